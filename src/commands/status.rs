use crate::output::Console;
use vertica_supervisor::Supervisor;

pub async fn run_status(supervisor: &Supervisor, json: bool, out: &Console) -> anyhow::Result<()> {
    let container = supervisor.config().container.clone();
    let observation = supervisor.probe().status(&container).await;

    if json {
        use serde_json::json;

        let status_obj = json!({
            "container": container,
            "status": observation.status,
            "health": observation.health,
            "uptime_seconds": observation.uptime_seconds,
            "restart_count": observation.restart_count,
        });
        out.line(&serde_json::to_string_pretty(&status_obj)?);
        return Ok(());
    }

    let status_icon = match (observation.status.is_live(), observation.health) {
        (true, vertica_supervisor::HealthState::Healthy) => "+",
        (true, vertica_supervisor::HealthState::Unhealthy) => "x",
        (true, _) => ".",
        (false, _) => "o",
    };
    out.line("Container Status:");
    out.line(&format!("{:-<50}", ""));
    out.line(&format!("  {} {:<30} {}", status_icon, container, observation.status));
    out.line(&format!("    health:        {}", observation.health));
    out.line(&format!(
        "    uptime:        {}",
        observation
            .uptime_seconds
            .map_or_else(|| "unknown".to_string(), |s| format!("{:.0}s", s))
    ));
    out.line(&format!(
        "    restart count: {}",
        observation
            .restart_count
            .map_or_else(|| "unknown".to_string(), |n| n.to_string())
    ));
    Ok(())
}
