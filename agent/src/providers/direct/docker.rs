//! Docker command lines for the direct host

use crate::errors::AgentError;
use crate::models::deployment::{DeploymentConfig, DeploymentStatus};
use crate::utils::shell_quote;

/// Translate unit notation (`512Mi`, `1G`, `2048`) into a docker size flag value
pub fn docker_size(size: &str) -> Result<String, AgentError> {
    let size = size.trim();
    let split = size
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(size.len());
    let (number, unit) = size.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| AgentError::ConfigError(format!("Invalid size: {}", size)))?;

    let (scaled, suffix) = match unit {
        "" | "b" | "B" => (value, "b"),
        "Ki" | "K" | "k" | "KB" => (value, "k"),
        "Mi" | "M" | "m" | "MB" => (value, "m"),
        "Gi" | "G" | "g" | "GB" => (value, "g"),
        "Ti" | "T" | "TB" => (value * 1024.0, "g"),
        _ => return Err(AgentError::ConfigError(format!("Invalid size unit: {}", size))),
    };

    if scaled.fract() == 0.0 {
        Ok(format!("{}{}", scaled as u64, suffix))
    } else {
        // Docker wants integers; drop one unit
        let (lower, lower_suffix) = match suffix {
            "g" => (scaled * 1024.0, "m"),
            "m" => (scaled * 1024.0, "k"),
            "k" => (scaled * 1024.0, "b"),
            _ => (scaled, "b"),
        };
        Ok(format!("{}{}", lower.round() as u64, lower_suffix))
    }
}

pub fn pull_command(image: &str) -> String {
    format!("docker pull {}", shell_quote(image))
}

/// Full `docker run` line for a deployment
pub fn run_command(container: &str, config: &DeploymentConfig) -> Result<String, AgentError> {
    let mut parts = vec![
        "docker run -d".to_string(),
        format!("--name {}", shell_quote(container)),
        "--restart unless-stopped".to_string(),
        format!("--cpus={}", config.cpu),
        format!("--memory={}", docker_size(&config.memory)?),
    ];

    for (key, value) in config.sorted_env() {
        parts.push(format!("-e {}", shell_quote(&format!("{}={}", key, value))));
    }

    for port in &config.ports {
        parts.push(format!("-p {}:{}", port, port));
    }

    if let Some(volume) = &config.persistent {
        parts.push(format!(
            "-v {}",
            shell_quote(&format!("{}-data:{}", container, volume.mount))
        ));
    }

    parts.push(shell_quote(&config.image));
    Ok(parts.join(" "))
}

pub fn inspect_command(container: &str) -> String {
    format!(
        "docker inspect --format '{{{{.State.Status}}}}' {}",
        shell_quote(container)
    )
}

pub fn stop_command(container: &str) -> String {
    format!("docker stop {}", shell_quote(container))
}

pub fn remove_command(container: &str) -> String {
    format!("docker rm {}", shell_quote(container))
}

pub fn logs_command(container: &str, lines: usize) -> String {
    format!("docker logs --tail {} {} 2>&1", lines, shell_quote(container))
}

/// Map a docker container state to a deployment status
pub fn map_state(state: &str) -> DeploymentStatus {
    match state.trim() {
        "running" => DeploymentStatus::Running,
        "exited" | "dead" => DeploymentStatus::Stopped,
        "created" | "restarting" => DeploymentStatus::Deploying,
        _ => DeploymentStatus::Unknown,
    }
}

/// Docker's error output for a container that does not exist
pub fn is_missing_container(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such container") || stderr.contains("no such object")
}
