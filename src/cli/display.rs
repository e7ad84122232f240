//! Display formatting for CLI output
//!
//! Pure functions that turn API data into plain aligned text.

use crate::api::{Deployment, Provider, ResourcesStatistics, Service, ServiceLog};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format rows under upper-cased headers, each column padded to its widest cell
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |cells: Vec<String>| -> String {
        let line = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| match widths.get(i) {
                Some(width) => format!("{:width$}", cell, width = width),
                None => cell.clone(),
            })
            .collect::<Vec<_>>()
            .join("   ");
        format!("{}\n", line.trim_end())
    };

    let mut output = render(headers.iter().map(|h| h.to_uppercase()).collect());
    for row in rows {
        output.push_str(&render(row));
    }
    output
}

fn short_time(time: &chrono::DateTime<chrono::Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn replicas(service: &Service) -> String {
    format!(
        "{}/{}",
        service.status.ready_replicas, service.status.total_replicas
    )
}

fn ports(service: &Service) -> String {
    if service.ports.is_empty() {
        return "-".to_string();
    }
    service
        .ports
        .iter()
        .map(|p| {
            let protocol = if p.protocol.is_empty() {
                "tcp".to_string()
            } else {
                p.protocol.to_lowercase()
            };
            if p.expose_port > 0 {
                format!("{}->{}/{}", p.expose_port, p.port, protocol)
            } else {
                format!("{}/{}", p.port, protocol)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// Deployment display
// ============================================================================

/// Format deployment list for display; one row per service
pub fn format_deployment_list(deployments: &[Deployment]) -> String {
    let headers = &["ID", "NAME", "PROVIDER", "STATE", "IMAGE", "READY", "PORTS", "CREATED"];
    let mut rows = Vec::new();

    for d in deployments {
        let base = |service: Option<&Service>| {
            vec![
                d.id.to_string(),
                d.name.clone(),
                d.provider_id.to_string(),
                d.state.to_string(),
                service.map(|s| s.image.clone()).unwrap_or_default(),
                service.map(replicas).unwrap_or_default(),
                service.map(ports).unwrap_or_default(),
                short_time(&d.created_at),
            ]
        };

        if d.services.is_empty() {
            rows.push(base(None));
        } else {
            rows.extend(d.services.iter().map(|s| base(Some(s))));
        }
    }

    format_table(headers, rows)
}

/// Format a single deployment for detailed display
pub fn format_deployment_detail(deployment: &Deployment) -> String {
    let mut output = String::new();

    output.push_str(&format!("ID:         {}\n", deployment.id));
    if !deployment.name.is_empty() {
        output.push_str(&format!("Name:       {}\n", deployment.name));
    }
    if !deployment.owner.is_empty() {
        output.push_str(&format!("Owner:      {}\n", deployment.owner));
    }
    output.push_str(&format!("Provider:   {}\n", deployment.provider_id));
    if !deployment.provider_expose_ip.is_empty() {
        output.push_str(&format!("Address:    {}\n", deployment.provider_expose_ip));
    }
    output.push_str(&format!("State:      {}\n", deployment.state));
    output.push_str(&format!("Created:    {}\n", short_time(&deployment.created_at)));
    output.push_str(&format!("Updated:    {}\n", short_time(&deployment.updated_at)));

    if !deployment.services.is_empty() {
        output.push_str("\nServices:\n");
        for service in &deployment.services {
            let resources = &service.compute_resources;
            output.push_str(&format!("  - {}\n", service.image));
            if !service.name.is_empty() {
                output.push_str(&format!("    Name:      {}\n", service.name));
            }
            output.push_str(&format!("    Ready:     {}\n", replicas(service)));
            output.push_str(&format!("    Ports:     {}\n", ports(service)));
            output.push_str(&format!(
                "    Resources: cpu={} memory={}MB storage={}MB\n",
                resources.cpu, resources.memory, resources.storage
            ));
            if !service.error_message.is_empty() {
                output.push_str(&format!("    Error:     {}\n", service.error_message));
            }
        }
    }

    output
}

/// Format aggregated service logs
pub fn format_logs(logs: &[ServiceLog]) -> String {
    if logs.is_empty() {
        return "No logs.\n".to_string();
    }

    let mut output = String::new();
    for log in logs {
        output.push_str(&format!("==> {} <==\n", log.service_name));
        for entry in &log.logs {
            output.push_str(entry);
            if !entry.ends_with('\n') {
                output.push('\n');
            }
        }
    }
    output
}

// ============================================================================
// Provider display
// ============================================================================

/// Format provider list for display
pub fn format_provider_list(providers: &[Provider]) -> String {
    let headers = &["ID", "OWNER", "IP", "HOST", "STATE", "UPDATED"];
    let rows: Vec<Vec<String>> = providers
        .iter()
        .map(|p| {
            vec![
                p.id.to_string(),
                p.owner.clone(),
                p.ip.clone(),
                p.host_uri.clone(),
                p.state.to_string(),
                short_time(&p.updated_at),
            ]
        })
        .collect();

    format_table(headers, rows)
}

fn gigabytes(bytes: f64) -> String {
    format!("{:.2}G", bytes / 1e9)
}

/// Format provider statistics for display
pub fn format_statistics(provider_id: &str, stats: &ResourcesStatistics) -> String {
    let headers = &["RESOURCE", "MAX", "AVAILABLE", "ACTIVE", "PENDING"];
    let cpu = &stats.cpu_cores;
    let memory = &stats.memory;
    let storage = &stats.storage;
    let rows = vec![
        vec![
            "cpu".to_string(),
            format!("{:.2}", cpu.max_cpu_cores),
            format!("{:.2}", cpu.available),
            format!("{:.2}", cpu.active),
            format!("{:.2}", cpu.pending),
        ],
        vec![
            "memory".to_string(),
            gigabytes(memory.max_memory as f64),
            gigabytes(memory.available as f64),
            gigabytes(memory.active as f64),
            gigabytes(memory.pending as f64),
        ],
        vec![
            "storage".to_string(),
            gigabytes(storage.max_storage as f64),
            gigabytes(storage.available as f64),
            gigabytes(storage.active as f64),
            gigabytes(storage.pending as f64),
        ],
    ];

    format!("Provider {}\n\n{}", provider_id, format_table(headers, rows))
}
