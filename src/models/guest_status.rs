use serde::{Deserialize, Serialize};

/// Lifecycle state of a guest. There is no terminal state: a guest cycles
/// between `CheckedIn` and `CheckedOut` for as long as the record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestStatus {
    Registered,
    CheckedIn,
    CheckedOut,
}

impl GuestStatus {
    /// Convert enum → DB string
    pub fn to_db_str(&self) -> &'static str {
        match self {
            GuestStatus::Registered => "registered",
            GuestStatus::CheckedIn => "checked_in",
            GuestStatus::CheckedOut => "checked_out",
        }
    }

    /// Convert DB string → enum
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "registered" => Some(GuestStatus::Registered),
            "checked_in" => Some(GuestStatus::CheckedIn),
            "checked_out" => Some(GuestStatus::CheckedOut),
            _ => None,
        }
    }

    pub fn is_checked_in(&self) -> bool {
        matches!(self, GuestStatus::CheckedIn)
    }
}

/// Direction taken by a scan toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    CheckedIn,
    CheckedOut,
}

impl From<ScanDirection> for GuestStatus {
    fn from(dir: ScanDirection) -> Self {
        match dir {
            ScanDirection::CheckedIn => GuestStatus::CheckedIn,
            ScanDirection::CheckedOut => GuestStatus::CheckedOut,
        }
    }
}
