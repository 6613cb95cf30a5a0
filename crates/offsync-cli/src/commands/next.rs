use offsync_core::{next_occurrence, RecurringConfig};

/// Print the occurrence after `from` (or now) for a JSON recurring config.
pub fn run(config: &str, from: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config: RecurringConfig = serde_json::from_str(config)?;
    let reference = match from {
        Some(from) => from.to_string(),
        None => chrono::Utc::now().to_rfc3339(),
    };

    match next_occurrence(Some(&config), &reference) {
        Some(next) => println!("{}", next.to_rfc3339()),
        None => println!("no further occurrences"),
    }
    Ok(())
}
