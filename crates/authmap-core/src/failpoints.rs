//! Feature-gated failpoint injection for crash and fault tests.
//!
//! Build with `--features failpoints` to enable injection. Without the
//! feature, `fp!()` always evaluates to `Ok(())`.
//!
//! Named points in this workspace:
//!
//! | Name                          | Where                                        |
//! |-------------------------------|----------------------------------------------|
//! | `FP_FILE_BEFORE_RENAME`       | file store, temp file written, not renamed   |
//! | `FP_RECONCILE_AFTER_WRITE`    | table written, snippet status not yet saved  |
//! | `FP_FINALIZE_AFTER_WRITE`     | table written, finalizer not yet released    |

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;

/// Actions a failpoint can take when triggered.
#[derive(Clone, Debug)]
pub enum FailpointAction {
    /// No-op.
    Off,
    /// Return [`Injected`] with the given message.
    Error(String),
    /// Panic with the given message.
    Panic(String),
    /// Sleep, then continue.
    Sleep(Duration),
}

/// Error returned by a triggered `Error` failpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Injected {
    /// Failpoint name.
    pub name: String,
    /// Configured message.
    pub message: String,
}

impl fmt::Display for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failpoint {}: {}", self.name, self.message)
    }
}

impl std::error::Error for Injected {}

static REGISTRY: LazyLock<Mutex<HashMap<&'static str, FailpointAction>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn registry() -> std::sync::MutexGuard<'static, HashMap<&'static str, FailpointAction>> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Arm a failpoint.
pub fn set(name: &'static str, action: FailpointAction) {
    registry().insert(name, action);
}

/// Disarm one failpoint.
pub fn clear(name: &'static str) {
    registry().remove(name);
}

/// Disarm every failpoint.
pub fn clear_all() {
    registry().clear();
}

/// Run the action armed at `name`, if any.
///
/// # Errors
/// [`Injected`] when the failpoint is armed with [`FailpointAction::Error`].
///
/// # Panics
/// When the failpoint is armed with [`FailpointAction::Panic`].
pub fn check(name: &str) -> Result<(), Injected> {
    let action = registry().get(name).cloned();
    match action {
        None | Some(FailpointAction::Off) => Ok(()),
        Some(FailpointAction::Error(message)) => Err(Injected {
            name: name.to_owned(),
            message,
        }),
        Some(FailpointAction::Panic(msg)) => panic!("failpoint {name}: {msg}"),
        Some(FailpointAction::Sleep(d)) => {
            std::thread::sleep(d);
            Ok(())
        }
    }
}

/// Failpoint injection point.
///
/// Usage: `fp!("FP_RECONCILE_AFTER_WRITE").map_err(...)?;`
#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        $crate::failpoints::check($name)
    };
}

/// Failpoint injection point (disabled build).
#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        Ok::<(), $crate::failpoints::Injected>(())
    };
}
