/// Utility functions for formatting, file naming and cancellation
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::watch;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

/// Format a sample timestamp for CSV export as YYYY-MM-DD HH:MM:SS in `offset`
pub fn format_sample_timestamp(dt: &OffsetDateTime, offset: UtcOffset) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let local = dt.to_offset(offset);
    local.format(&format).unwrap_or_else(|_| local.to_string())
}

/// Whole seconds since the Unix epoch, the key format of tasks.json and sensors.json
pub fn epoch_seconds(dt: &OffsetDateTime) -> i64 {
    dt.unix_timestamp()
}

/// Make an operator-supplied device name safe to embed in a file name
pub fn sanitize_file_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Resolves once `cancel` reads true; never resolves if the sender is gone
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn formats_log_and_export_timestamps() {
        let dt = datetime!(2024-03-05 07:08:09 UTC);
        assert_eq!(format_datetime(&dt), "05.03.2024 - 07:08:09");
        assert_eq!(format_sample_timestamp(&dt, UtcOffset::UTC), "2024-03-05 07:08:09");
        assert_eq!(format_sample_timestamp(&dt, offset!(+2)), "2024-03-05 09:08:09");
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_component(" Living room "), "Living room");
        assert_eq!(sanitize_file_component("a/b:c"), "a_b_c");
        assert_eq!(sanitize_file_component("   "), "unnamed");
    }

    #[tokio::test]
    async fn cancelled_resolves_after_send() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        cancelled(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_stays_pending_without_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waited = tokio::time::timeout(std::time::Duration::from_secs(5), cancelled(&mut rx)).await;
        assert!(waited.is_err());
        drop(tx);
    }
}
