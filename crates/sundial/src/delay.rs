// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// A future that completes after a duration of clock time.
///
/// Created by [`Clock::delay`][crate::Clock::delay]. The underlying timer is registered on
/// first poll and released when the delay is dropped, so abandoned delays cost nothing.
pub struct Delay(DelayRepr);

enum DelayRepr {
    Done,
    Never,
    System {
        duration: Duration,
        sleep: Option<Pin<Box<tokio::time::Sleep>>>,
    },
    #[cfg(any(feature = "test-util", test))]
    Controlled {
        control: crate::ClockControl,
        deadline: Duration,
        key: Option<u64>,
    },
}

impl Delay {
    pub(crate) fn system(duration: Duration) -> Self {
        Self(match duration {
            Duration::ZERO => DelayRepr::Done,
            Duration::MAX => DelayRepr::Never,
            duration => DelayRepr::System { duration, sleep: None },
        })
    }

    #[cfg(any(feature = "test-util", test))]
    pub(crate) fn controlled(control: crate::ClockControl, duration: Duration) -> Self {
        Self(match duration {
            Duration::ZERO => DelayRepr::Done,
            Duration::MAX => DelayRepr::Never,
            duration => DelayRepr::Controlled {
                deadline: control.elapsed().saturating_add(duration),
                control,
                key: None,
            },
        })
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let ready = match &mut self.0 {
            DelayRepr::Done => return Poll::Ready(()),
            DelayRepr::Never => return Poll::Pending,
            DelayRepr::System { duration, sleep } => sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(*duration)))
                .as_mut()
                .poll(cx)
                .is_ready(),
            #[cfg(any(feature = "test-util", test))]
            DelayRepr::Controlled { control, deadline, key } => control.poll_timer(*deadline, key, cx.waker()),
        };

        if ready {
            // Replacing the repr drops any registration; a completed delay stays completed.
            self.0 = DelayRepr::Done;
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        #[cfg(any(feature = "test-util", test))]
        if let DelayRepr::Controlled {
            control,
            deadline,
            key: Some(key),
        } = &self.0
        {
            control.unregister(*deadline, *key);
        }
    }
}

impl Debug for Delay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match &self.0 {
            DelayRepr::Done => "done",
            DelayRepr::Never => "never",
            DelayRepr::System { .. } => "system",
            #[cfg(any(feature = "test-util", test))]
            DelayRepr::Controlled { .. } => "controlled",
        };
        f.debug_struct("Delay").field("state", &state).finish()
    }
}
