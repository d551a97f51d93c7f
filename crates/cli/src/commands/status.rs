use prettytable::{row, Table};
use switcher_core::{InstanceStatus, Switcher, SwitcherConfig};

use super::utils::{print_info, CliResult};

/// Runs initialization (including the first check pass when tracking is enabled) and prints the
/// resulting state of every instance.
pub async fn show_status(config: SwitcherConfig, check: bool, json: bool) -> CliResult<()> {
    let tracking = config.tracking.enabled;
    let switcher = Switcher::new(config)?;

    print_info("Waiting for instances to load...");
    switcher.wait_for_ready().await;

    // With tracking enabled, init already ran a full pass
    if check && !tracking {
        switcher.tracker().check_all().await;
    }

    let statuses = switcher.statuses();
    switcher.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        print_status_table(&statuses);
    }

    Ok(())
}

fn format_latency(latency_ms: Option<u64>) -> String {
    latency_ms.map_or_else(|| "-".to_string(), |ms| format!("{ms}ms"))
}

fn print_status_table(statuses: &[InstanceStatus]) {
    let mut table = Table::new();
    table.add_row(row!["Site", "Available", "Working", "Avg Latency", "Records", "Blacklisted"]);

    for status in statuses {
        table.add_row(row![
            status.site,
            status.available,
            if status.working { "up" } else { "down" },
            format_latency(status.average_latency_ms),
            status.records,
            status.blacklisted_kinds.join(", "),
        ]);
    }

    table.printstd();

    let working = statuses.iter().filter(|s| s.working).count();
    println!("{working}/{} instances working", statuses.len());
}
