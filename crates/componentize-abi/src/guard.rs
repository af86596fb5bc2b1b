//! Instance-wide in-call flag.

use crate::error::ReentranceError;

/// Tracks whether an export of an instance is currently executing.
///
/// The flag is raised when an export is entered and stays raised until the
/// export's post-return completes, so a second entry in between is a trap.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallGuard {
    active: Option<String>,
}

impl CallGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, name: &str) -> Result<(), ReentranceError> {
        if let Some(active) = &self.active {
            return Err(ReentranceError {
                active: active.clone(),
                attempted: name.to_string(),
            });
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn exit(&mut self) {
        self.active = None;
    }

    /// Name of the export holding the flag.
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_rejected() {
        let mut guard = CallGuard::new();
        assert!(guard.enter("run").is_ok());
        let err = guard.enter("run");
        assert_eq!(
            err,
            Err(ReentranceError {
                active: "run".into(),
                attempted: "run".into()
            })
        );
        guard.exit();
        assert!(guard.enter("other").is_ok());
        assert_eq!(guard.active(), Some("other"));
    }
}
