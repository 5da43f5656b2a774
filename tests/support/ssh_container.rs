// ABOUTME: OpenSSH container for end-to-end tests against a real sshd.
// ABOUTME: Uses bollard to start one shared container per test binary.

use bollard::Docker;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StopContainerOptions,
};
use futures::StreamExt;
use labexec::config::Config;
use labexec::ssh::SessionConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const IMAGE: &str = "lscr.io/linuxserver/openssh-server:latest";
const SSH_PORT: u16 = 2222;
pub const TEST_USER: &str = "testuser";

/// Container info needed for cleanup.
struct ContainerInfo {
    container_id: String,
}

/// Shared container info for cleanup.
static CONTAINER_INFO: OnceLock<ContainerInfo> = OnceLock::new();

/// Cleanup on process exit.
#[ctor::dtor]
fn cleanup_on_exit() {
    let Some(info) = CONTAINER_INFO.get() else {
        return;
    };
    let Ok(rt) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return;
    };
    rt.block_on(async {
        if let Ok(docker) = Docker::connect_with_local_defaults() {
            let _ = docker
                .stop_container(&info.container_id, None::<StopContainerOptions>)
                .await;
            let _ = docker
                .remove_container(
                    &info.container_id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
        }
    });
}

/// Shared SSH container for all tests.
static SHARED_CONTAINER: tokio::sync::OnceCell<SshContainer> = tokio::sync::OnceCell::const_new();

/// Get the shared SSH container, starting it if needed.
pub async fn shared_container() -> &'static SshContainer {
    SHARED_CONTAINER
        .get_or_init(|| async {
            SshContainer::start()
                .await
                .expect("failed to start SSH container")
        })
        .await
}

/// Running SSH container with connection details.
pub struct SshContainer {
    port: u16,
}

impl SshContainer {
    async fn start() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let docker = Docker::connect_with_local_defaults()?;

        let public_key = std::fs::read_to_string(super::fixture_key().with_extension("pub"))?;

        let mut pull_stream = docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(IMAGE.to_string()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(result) = pull_stream.next().await {
            result?;
        }

        let port = Self::find_available_port().await?;

        let container_name = format!("labexec-ssh-test-{}", std::process::id());
        let mut env = Vec::new();
        env.push("PUID=1000".to_string());
        env.push("PGID=1000".to_string());
        env.push(format!("USER_NAME={}", TEST_USER));
        env.push(format!("PUBLIC_KEY={}", public_key.trim()));

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            format!("{}/tcp", SSH_PORT),
            Some(vec![bollard::models::PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(port.to_string()),
            }]),
        );

        let host_config = bollard::models::HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let config = ContainerCreateBody {
            image: Some(IMAGE.to_string()),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(container_name),
                    ..Default::default()
                }),
                config,
            )
            .await?;

        let _ = CONTAINER_INFO.set(ContainerInfo {
            container_id: container.id.clone(),
        });

        docker
            .start_container(
                &container.id,
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await?;

        Self::wait_for_ssh(port).await?;

        Ok(Self { port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Session settings for this container, pinning host keys in `known_hosts`.
    pub fn session_config(&self, known_hosts: &Path) -> SessionConfig {
        SessionConfig::new("127.0.0.1", TEST_USER, super::fixture_key())
            .port(self.port)
            .known_hosts_path(known_hosts)
            .trust_on_first_use(true)
    }

    /// Executor configuration with one target, `lab`, pointing at this
    /// container. Keys, known_hosts and the audit log live under `work_dir`.
    pub fn labexec_config(&self, work_dir: &Path) -> Config {
        let key_dir = work_dir.join("keys");
        super::install_key(&key_dir, "lab");
        let yaml = format!(
            r#"
targets:
  - id: lab
    host: 127.0.0.1
    port: {port}
    user: {user}
execution:
  default_timeout: 20s
  default_retry: 2
  key_storage_path: {keys}
  known_hosts_path: {known_hosts}
  trust_first_connection: true
  script_dir: /tmp/labexec-test
audit:
  path: {audit}
  actor: e2e
"#,
            port = self.port,
            user = TEST_USER,
            keys = key_dir.display(),
            known_hosts = Self::known_hosts_in(work_dir).display(),
            audit = work_dir.join("audit.jsonl").display(),
        );
        Config::from_yaml(&yaml).expect("container config should parse")
    }

    pub fn known_hosts_in(work_dir: &Path) -> PathBuf {
        work_dir.join("known_hosts")
    }

    async fn find_available_port() -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);
        Ok(port)
    }

    async fn wait_for_ssh(port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        use tokio::io::AsyncReadExt;

        let addr = format!("127.0.0.1:{}", port);
        for _ in 0..60 {
            if let Ok(mut stream) = tokio::net::TcpStream::connect(&addr).await {
                let mut buf = [0u8; 32];
                match tokio::time::timeout(std::time::Duration::from_secs(2), stream.read(&mut buf))
                    .await
                {
                    Ok(Ok(n)) if n > 0 => {
                        let banner = String::from_utf8_lossy(&buf[..n]);
                        if banner.starts_with("SSH-") {
                            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                            return Ok(());
                        }
                    }
                    _ => {}
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        Err("SSH container did not become ready in time".into())
    }
}
