use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    image::CreateImageOptions,
    models::{
        ContainerStateStatusEnum, HostConfig, PortMap, RestartPolicy, RestartPolicyNameEnum,
    },
};
use futures_util::stream::StreamExt;
use tracing::{debug, error, info};

use super::executor::{ContainerInspection, ContainerStatus, Executor};
use super::types::{Config, DockerError, ExecutorResult};

/// Executor backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerClient {
    client: Docker,
}

impl DockerClient {
    pub fn connect() -> ExecutorResult<Self> {
        let client = Docker::connect_with_local_defaults()?;
        Ok(DockerClient { client })
    }

    async fn pull_image(&self, image: &str) -> ExecutorResult<()> {
        let (from_image, tag) = split_image(image);
        info!(image, "Pulling image");

        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image,
                tag,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image, status, "Pull progress");
                    }
                }
                Err(e) => {
                    error!(image, error = %e, "Error during image pull stream");
                    return Err(e.into());
                }
            }
        }

        info!(image, "Image pulled");
        Ok(())
    }
}

#[async_trait]
impl Executor for DockerClient {
    async fn start(&self, config: &Config) -> ExecutorResult<String> {
        if config.image.trim().is_empty() {
            return Err(DockerError::ClientError("no image configured".to_string()));
        }

        self.pull_image(&config.image).await?;

        let restart_policy = RestartPolicy {
            name: Some(restart_policy_name(&config.restart_policy)),
            maximum_retry_count: None,
        };

        let host_config = HostConfig {
            restart_policy: Some(restart_policy),
            nano_cpus: (config.cpu > 0.0).then(|| (config.cpu * 1_000_000_000.0) as i64),
            memory: (config.memory > 0).then_some(config.memory),
            publish_all_ports: Some(true),
            ..Default::default()
        };

        let container_config = ContainerConfig {
            image: Some(config.image.clone()),
            env: Some(config.env.clone()),
            cmd: (!config.cmd.is_empty()).then(|| config.cmd.clone()),
            attach_stdin: Some(config.attach_stdin),
            attach_stdout: Some(config.attach_stdout),
            attach_stderr: Some(config.attach_stderr),
            exposed_ports: Some(
                config
                    .exposed_ports
                    .iter()
                    .map(|port| (port.clone(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: config.name.clone(),
            ..Default::default()
        });

        let created = self
            .client
            .create_container(options, container_config)
            .await
            .inspect_err(|e| error!(image = %config.image, error = %e, "Error creating container"))?;
        info!(container_id = %created.id, "Container created");

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .inspect_err(|e| error!(container_id = %created.id, error = %e, "Error starting container"))?;
        info!(container_id = %created.id, name = %config.name, "Container started");

        Ok(created.id)
    }

    async fn stop(&self, container_id: &str) -> ExecutorResult<()> {
        info!(container_id, "Stopping container");
        self.client
            .stop_container(container_id, None::<StopContainerOptions>)
            .await?;

        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;

        info!(container_id, "Container stopped and removed");
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> ExecutorResult<Option<ContainerInspection>> {
        let response = match self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state = response.state.unwrap_or_default();
        Ok(Some(ContainerInspection {
            status: container_status(state.status),
            exit_code: state.exit_code,
            port_bindings: flatten_ports(response.network_settings.and_then(|n| n.ports)),
        }))
    }
}

/// Splits `repo[:tag]` so a bare repository pulls `latest` rather than every tag.
fn split_image(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

fn restart_policy_name(policy: &str) -> RestartPolicyNameEnum {
    match policy {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        _ => RestartPolicyNameEnum::NO,
    }
}

fn container_status(status: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerStatus::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerStatus::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Dead,
        _ => ContainerStatus::Unknown,
    }
}

fn flatten_ports(ports: Option<PortMap>) -> HashMap<String, String> {
    ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(port, bindings)| {
            let binding = bindings?.into_iter().next()?;
            let host_port = binding.host_port?;
            let host_ip = binding
                .host_ip
                .filter(|ip| !ip.is_empty())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            Some((port, format!("{host_ip}:{host_port}")))
        })
        .collect()
}
