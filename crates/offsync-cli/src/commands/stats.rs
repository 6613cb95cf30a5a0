use offsync_core::SyncStore;

use super::open_store;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store()?;
    let stats = store.load_stats()?.unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
