use clap::Subcommand;
use offsync_core::sync::TombstoneRegistry;

use super::open_store;

#[derive(Subcommand)]
pub enum TombstonesAction {
    /// List tombstoned entity ids
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: TombstonesAction) -> Result<(), Box<dyn std::error::Error>> {
    let registry = TombstoneRegistry::open(open_store()?)?;

    match action {
        TombstonesAction::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(registry.ids())?);
            } else if registry.is_empty() {
                println!("No tombstones.");
            } else {
                for id in registry.ids() {
                    println!("{id}");
                }
            }
        }
    }
    Ok(())
}
