//! Panic capture for worker threads
//!
//! Workers opt in with [`capture_on_this_thread`]. A process-wide hook, installed once and
//! chained to whatever hook was there before, records the message, location and backtrace of
//! panics raised on opted-in threads instead of printing them. [`catch`] then hands that record
//! back to the worker so it can be stored as the task's failure.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// What a panic looked like when it was raised
#[derive(Debug, Clone)]
pub(crate) struct PanicReport {
    pub message: String,
    pub location: Option<String>,
    pub backtrace: String,
}

impl PanicReport {
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        Self {
            message: payload_message(payload),
            location: None,
            backtrace: String::new(),
        }
    }

    /// Multi-line trace in the same spirit as the default panic output
    pub fn render(&self) -> String {
        let mut trace = match &self.location {
            Some(location) => format!("panicked at {}:\n{}", location, self.message),
            None => format!("panicked: {}", self.message),
        };
        if !self.backtrace.is_empty() {
            trace.push_str("\nstack backtrace:\n");
            trace.push_str(&self.backtrace);
        }
        trace
    }
}

pub(crate) fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let report = PanicReport {
                    message: payload_message(info.payload()),
                    location: info.location().map(ToString::to_string),
                    backtrace: Backtrace::force_capture().to_string(),
                };
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(report));
            } else {
                previous(info);
            }
        }));
    });
}

/// Route panics on the current thread into [`catch`] instead of stderr
pub(crate) fn capture_on_this_thread() {
    install_hook();
    CAPTURING.with(|capturing| capturing.set(true));
}

/// Run `f`, turning a panic into a [`PanicReport`]
pub(crate) fn catch<F, R>(f: F) -> Result<R, PanicReport>
where
    F: FnOnce() -> R,
{
    // A panic the callable caught itself must not be reported later
    LAST_PANIC.with(|slot| slot.borrow_mut().take());
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => {
            let captured = LAST_PANIC.with(|slot| slot.borrow_mut().take());
            Err(captured.unwrap_or_else(|| PanicReport::from_payload(&*payload)))
        }
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_returns_value() {
        assert_eq!(catch(|| 21 * 2).unwrap(), 42);
    }

    #[test]
    fn test_catch_records_location_on_capturing_thread() {
        let report = std::thread::spawn(|| {
            capture_on_this_thread();
            catch(|| -> u32 { panic!("exploded with {}", 3) }).unwrap_err()
        })
        .join()
        .unwrap();

        assert_eq!(report.message, "exploded with 3");
        assert!(report.location.as_deref().unwrap_or("").contains("panic.rs"));
        assert!(report.render().starts_with("panicked at"));
    }

    #[test]
    fn test_caught_panic_does_not_leak_into_next_report() {
        let report = std::thread::spawn(|| {
            capture_on_this_thread();
            let inner = catch(|| std::panic::catch_unwind(|| -> u32 { panic!("handled inside") }));
            assert!(matches!(inner, Ok(Err(_))));

            catch(|| -> u32 { panic::resume_unwind(Box::new("resumed")) }).unwrap_err()
        })
        .join()
        .unwrap();

        assert_eq!(report.message, "resumed");
        assert!(report.location.is_none());
    }
}
