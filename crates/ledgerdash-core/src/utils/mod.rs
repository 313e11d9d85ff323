//! Utility functions for money, date and string formatting.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{
    format_cents, format_date, format_percent, format_signed_cents, format_timestamp,
    truncate_string,
};
