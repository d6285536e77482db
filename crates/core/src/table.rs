//! Logical table naming.
//!
//! The engine accepts any [`Table`]; application code names tables through the
//! closed [`AppTable`] enum so that the shared/isolated classification is
//! checked at compile time where it matters.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Anything that names a logical table.
pub trait Table {
    fn name(&self) -> &str;
}

impl Table for str {
    fn name(&self) -> &str {
        self
    }
}

impl Table for String {
    fn name(&self) -> &str {
        self.as_str()
    }
}

impl<T: Table + ?Sized> Table for &T {
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// The tables of the reading-tracker application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppTable {
    Books,
    Notes,
    Quotes,
    ReadingSessions,
    ReadingGoals,
    ReadingStreaks,
    UserAchievements,
    Wishlist,
    /// Cross-tenant user profiles.
    Profiles,
    /// Global app registry.
    Apps,
    /// Global achievement catalog.
    Achievements,
}

impl AppTable {
    pub const ALL: [AppTable; 11] = [
        AppTable::Books,
        AppTable::Notes,
        AppTable::Quotes,
        AppTable::ReadingSessions,
        AppTable::ReadingGoals,
        AppTable::ReadingStreaks,
        AppTable::UserAchievements,
        AppTable::Wishlist,
        AppTable::Profiles,
        AppTable::Apps,
        AppTable::Achievements,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            AppTable::Books => "books",
            AppTable::Notes => "notes",
            AppTable::Quotes => "quotes",
            AppTable::ReadingSessions => "reading_sessions",
            AppTable::ReadingGoals => "reading_goals",
            AppTable::ReadingStreaks => "reading_streaks",
            AppTable::UserAchievements => "user_achievements",
            AppTable::Wishlist => "wishlist",
            AppTable::Profiles => "profiles",
            AppTable::Apps => "apps",
            AppTable::Achievements => "achievements",
        }
    }

    /// Shared tables are visible and writable regardless of tenant.
    pub const fn is_shared(&self) -> bool {
        matches!(
            self,
            AppTable::Profiles | AppTable::Apps | AppTable::Achievements
        )
    }

    pub fn shared() -> impl Iterator<Item = AppTable> {
        Self::ALL.into_iter().filter(|t| t.is_shared())
    }
}

impl Table for AppTable {
    fn name(&self) -> &str {
        self.as_str()
    }
}

impl core::fmt::Display for AppTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppTable {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DataError::invalid_table(format!("unknown application table `{s}`")))
    }
}
