//! Process and thread plumbing shared by the spawner backends.

use std::any::Any;

pub mod child;

/// Render a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Serializes tests that fork, spawn workers or print to stdout.
///
/// A child forked while another test thread holds the stdout lock (or the write end
/// of a sibling's result pipe) would inherit that state. Tests that print take the
/// lock too.
#[cfg(test)]
pub(crate) fn fork_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::Mutex;

    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::panic;

    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind::<_, ()>(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = panic::catch_unwind::<_, ()>(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");

        let payload = panic::catch_unwind::<_, ()>(|| panic::panic_any(5u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
