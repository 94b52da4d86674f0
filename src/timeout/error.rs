//! Handler failure captured on the worker task.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::sync::Once;

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

struct PanicSite {
    location: Option<String>,
    backtrace: Backtrace,
}

/// Chain a panic hook that records where the panic happened on the
/// panicking thread. The previous hook still runs.
///
/// Backtraces follow `RUST_BACKTRACE`. A re-raised [`HandlerFailure`]
/// already carries its site and is not recorded again.
pub(crate) fn install_panic_capture() {
    INSTALL_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<HandlerFailure>().is_none() {
                let site = PanicSite {
                    location: info.location().map(|l| l.to_string()),
                    backtrace: Backtrace::capture(),
                };
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(site));
            }
            previous(info);
        }));
    });
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(failure) = payload.downcast_ref::<HandlerFailure>() {
        failure.message.clone()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A panic raised by a handler, carried back to the serving task.
pub struct HandlerFailure {
    message: String,
    location: Option<String>,
    backtrace: Backtrace,
    payload: Box<dyn Any + Send>,
}

impl HandlerFailure {
    /// Wrap a payload caught with `catch_unwind`. Must be called on the
    /// thread that panicked to pick up the recorded panic site.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let site = LAST_PANIC.with(|slot| slot.borrow_mut().take());
        let (location, backtrace) = match site {
            Some(site) => (site.location, site.backtrace),
            None => (None, Backtrace::capture()),
        };
        Self {
            message: panic_message(payload.as_ref()),
            location,
            backtrace,
            payload,
        }
    }

    /// Failure for a worker that vanished without reporting back.
    pub(crate) fn lost() -> Self {
        Self {
            message: "handler task ended without reporting".to_string(),
            location: None,
            backtrace: Backtrace::disabled(),
            payload: Box::new("handler task ended without reporting"),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// `file:line:col` of the panic, when known.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The original panic payload.
    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "handler panicked at {}: {}", location, self.message),
            None => write!(f, "handler panicked: {}", self.message),
        }
    }
}

impl fmt::Debug for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFailure")
            .field("message", &self.message)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl std::error::Error for HandlerFailure {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_captures_message_and_location() {
        install_panic_capture();
        let payload = catch_unwind(AssertUnwindSafe(|| {
            let divisor = std::hint::black_box(0);
            let _ = 100 / divisor;
        }))
        .unwrap_err();

        let failure = HandlerFailure::from_panic(payload);
        assert!(failure.message().contains("divide by zero"));
        assert!(failure.location().unwrap().contains("error.rs"));
        assert!(failure.to_string().starts_with("handler panicked at"));
    }

    #[test]
    fn test_reraised_failure_is_not_recorded() {
        install_panic_capture();
        let failure = HandlerFailure::from_panic(Box::new("inner"));
        LAST_PANIC.with(|slot| *slot.borrow_mut() = None);

        let payload = catch_unwind(AssertUnwindSafe(|| {
            std::panic::panic_any(failure);
        }))
        .unwrap_err();

        assert!(LAST_PANIC.with(|slot| slot.borrow().is_none()));
        assert_eq!(panic_message(payload.as_ref()), "inner");
    }

    #[test]
    fn test_payload_is_preserved() {
        let failure = HandlerFailure::from_panic(Box::new(String::from("boom")));
        assert_eq!(failure.message(), "boom");
        let payload = failure.into_payload();
        assert_eq!(payload.downcast_ref::<String>().unwrap(), "boom");
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
        let nested = HandlerFailure::from_panic(Box::new("inner"));
        assert_eq!(panic_message(&nested), "inner");
    }
}
