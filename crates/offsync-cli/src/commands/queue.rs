use std::sync::Arc;

use clap::Subcommand;
use offsync_core::sync::OperationLog;
use offsync_core::LogNotifier;

use super::open_store;

#[derive(Subcommand)]
pub enum QueueAction {
    /// List pending operations in dispatch order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discard every pending operation
    Clear,
}

pub fn run(action: QueueAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut log = OperationLog::open(open_store()?, Arc::new(LogNotifier))?;

    match action {
        QueueAction::List { json } => {
            if json {
                let records = log.iter().map(|op| op.to_record()).collect::<Result<Vec<_>, _>>()?;
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            if log.is_empty() {
                println!("Queue is empty.");
                return Ok(());
            }
            for op in log.iter() {
                println!(
                    "{:<14} {:<38} retries={} {}",
                    op.op_type().as_str(),
                    op.id,
                    op.retry_count,
                    op.enqueued_at.to_rfc3339()
                );
            }
        }
        QueueAction::Clear => {
            let dropped = log.len();
            log.clear();
            println!("cleared {dropped} pending operation(s)");
        }
    }
    Ok(())
}
