//! Instance startup script.
//!
//! Rendered once per stack and handed to the autoscaling group. Sections
//! run in order: container runtime and image pull, environment file,
//! metrics agent, then the systemd unit that keeps the platform container
//! running.

use std::collections::BTreeMap;

use opsgrid_cloud::CloudConfig;
use opsgrid_core::naming;
use opsgrid_state::Deployment;
use serde_json::json;

pub const ENV_FILE: &str = "/etc/systemd/system/docker.fusebit.env";
pub const SERVICE_UNIT: &str = "/etc/systemd/system/docker.fusebit.service";
const AGENT_CONFIG: &str = "/opt/aws/amazon-cloudwatch-agent/bin/config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    pub deployment: String,
    pub stack_id: u32,
    pub image_tag: String,
    pub image_uri: String,
    /// Region of the image registry.
    pub registry_region: String,
    /// Port the platform listens on inside the container.
    pub api_port: u16,
    /// Port exposed on the instance, where the target group sends traffic.
    pub host_port: u16,
    pub environment: BTreeMap<String, String>,
}

/// Variables every platform container needs, before operator extras.
pub fn platform_environment(
    deployment: &Deployment,
    bucket: &str,
    config: &CloudConfig,
    api_port: u16,
) -> BTreeMap<String, String> {
    let queue_url = format!(
        "https://sqs.{}.amazonaws.com/{}/{}",
        deployment.region,
        config.account(),
        naming::cron_queue(&deployment.name)
    );
    BTreeMap::from([
        ("PORT".to_string(), api_port.to_string()),
        ("DEPLOYMENT_KEY".to_string(), deployment.name.clone()),
        ("AWS_REGION".to_string(), deployment.region.clone()),
        ("AWS_S3_BUCKET".to_string(), bucket.to_string()),
        ("LAMBDA_BUILDER_ROLE".to_string(), config.role_arn("flexd-builder")),
        ("LAMBDA_MODULE_BUILDER_ROLE".to_string(), config.role_arn("flexd-builder")),
        ("LAMBDA_USER_FUNCTION_ROLE".to_string(), config.role_arn("no-permissions")),
        ("CRON_QUEUE_URL".to_string(), queue_url),
    ])
}

impl UserData {
    pub fn render(&self) -> String {
        [
            "#!/bin/bash".to_string(),
            self.container_runtime(),
            self.env_file(),
            self.metrics_agent(),
            self.service(),
        ]
        .join("\n")
    }

    fn container_runtime(&self) -> String {
        let registry = self.image_uri.split('/').next().unwrap_or_default();
        format!(
            r#"
# Install docker

curl -fsSL https://download.docker.com/linux/ubuntu/gpg | apt-key add -
add-apt-repository "deb [arch=amd64] https://download.docker.com/linux/ubuntu $(lsb_release -cs) stable"
apt-get update
apt-get install -y docker-ce awscli

# Pull the platform image

aws ecr get-login-password --region {region} | docker login --username AWS --password-stdin {registry}
docker pull {image}"#,
            region = self.registry_region,
            image = self.image_uri,
        )
    }

    fn env_file(&self) -> String {
        let lines: Vec<String> = self
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!(
            "\n# Platform environment\n\ncat > {ENV_FILE} << 'EOF'\n{}\nEOF",
            lines.join("\n")
        )
    }

    /// Metrics agent configuration, tagged with the deployment and stack.
    pub fn agent_config(&self) -> serde_json::Value {
        let interval = 60;
        json!({
            "logs": {
                "logs_collected": {
                    "files": {
                        "collect_list": [{
                            "file_path": "/var/log/syslog",
                            "log_group_name": format!("/fusebit-mono/{}", self.deployment),
                            "log_stream_name": "{instance_id}",
                        }],
                    },
                },
            },
            "metrics": {
                "append_dimensions": {
                    "FusebitDeploymentName": self.deployment,
                    "FusebitStackId": self.stack_id.to_string(),
                    "FusebitImageTag": self.image_tag,
                    "AutoScalingGroupName": "${aws:AutoScalingGroupName}",
                    "ImageId": "${aws:ImageId}",
                    "InstanceId": "${aws:InstanceId}",
                    "InstanceType": "${aws:InstanceType}",
                },
                "metrics_collected": {
                    "cpu": {
                        "measurement": ["cpu_usage_idle", "cpu_usage_iowait", "cpu_usage_user", "cpu_usage_system"],
                        "metrics_collection_interval": interval,
                        "totalcpu": false,
                    },
                    "disk": {
                        "measurement": ["used_percent", "inodes_free"],
                        "metrics_collection_interval": interval,
                        "resources": ["*"],
                    },
                    "diskio": {
                        "measurement": ["io_time"],
                        "metrics_collection_interval": interval,
                        "resources": ["*"],
                    },
                    "mem": {
                        "measurement": ["mem_used_percent"],
                        "metrics_collection_interval": interval,
                    },
                    "swap": {
                        "measurement": ["swap_used_percent"],
                        "metrics_collection_interval": interval,
                    },
                },
            },
        })
    }

    fn metrics_agent(&self) -> String {
        // Quoted heredoc: the ${aws:...} placeholders must reach the agent verbatim.
        format!(
            r#"
# Install and start the metrics agent

wget https://s3.amazonaws.com/amazoncloudwatch-agent/ubuntu/amd64/latest/amazon-cloudwatch-agent.deb
dpkg -i -E ./amazon-cloudwatch-agent.deb

cat > {AGENT_CONFIG} << 'EOF'
{config:#}
EOF

/opt/aws/amazon-cloudwatch-agent/bin/amazon-cloudwatch-agent-ctl -a fetch-config -m ec2 -c file:{AGENT_CONFIG} -s
systemctl start amazon-cloudwatch-agent.service"#,
            config = self.agent_config(),
        )
    }

    fn service(&self) -> String {
        let run_args = [
            format!("-p {}:{}", self.host_port, self.api_port),
            "--name fusebit".to_string(),
            "--rm".to_string(),
            format!("--env-file {ENV_FILE}"),
            self.image_uri.clone(),
        ]
        .join(" ");
        format!(
            r#"
# Platform service

cat > {SERVICE_UNIT} << 'EOF'
[Unit]
Description=Fusebit Service
After=docker.service
Requires=docker.service

[Service]
TimeoutStartSec=0
Restart=always
ExecStart=/usr/bin/docker run {run_args}

[Install]
WantedBy=multi-user.target
EOF

systemctl start docker.fusebit"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_data() -> UserData {
        UserData {
            deployment: "d1".to_string(),
            stack_id: 3,
            image_tag: "1.42.0".to_string(),
            image_uri: "123456789012.dkr.ecr.us-east-1.amazonaws.com/fusebit-function-api:1.42.0".to_string(),
            registry_region: "us-east-1".to_string(),
            api_port: 3001,
            host_port: 80,
            environment: BTreeMap::from([
                ("PORT".to_string(), "3001".to_string()),
                ("DEPLOYMENT_KEY".to_string(), "d1".to_string()),
            ]),
        }
    }

    #[test]
    fn script_sections_are_ordered() {
        let script = user_data().render();
        assert!(script.starts_with("#!/bin/bash\n"));
        let docker = script.find("docker pull").unwrap();
        let env = script.find(ENV_FILE).unwrap();
        let agent = script.find("amazon-cloudwatch-agent.deb").unwrap();
        let unit = script.find(SERVICE_UNIT).unwrap();
        assert!(docker < env && env < agent && agent < unit);
        assert!(script.contains("DEPLOYMENT_KEY=d1\nPORT=3001\nEOF"));
        assert!(script.contains(
            "ExecStart=/usr/bin/docker run -p 80:3001 --name fusebit --rm --env-file /etc/systemd/system/docker.fusebit.env 123456789012.dkr.ecr.us-east-1.amazonaws.com/fusebit-function-api:1.42.0"
        ));
        assert!(script.contains("--password-stdin 123456789012.dkr.ecr.us-east-1.amazonaws.com\n"));
    }

    #[test]
    fn agent_config_carries_stack_dimensions() {
        let config = user_data().agent_config();
        let dims = &config["metrics"]["append_dimensions"];
        assert_eq!(dims["FusebitDeploymentName"], "d1");
        assert_eq!(dims["FusebitStackId"], "3");
        assert_eq!(dims["FusebitImageTag"], "1.42.0");
        assert_eq!(dims["InstanceId"], "${aws:InstanceId}");
        assert!(user_data().render().contains("\"FusebitStackId\": \"3\""));
    }

    #[test]
    fn platform_environment_points_at_deployment_resources() {
        let deployment = Deployment {
            name: "d1".to_string(),
            region: "us-west-2".to_string(),
            network_name: "net1".to_string(),
            domain_name: "example.com".to_string(),
            size: 2,
            segment_key: String::new(),
            elastic_search_endpoint: String::new(),
            data_warehouse_enabled: false,
            feature_use_dns_s3_bucket: false,
            grafana_endpoint: None,
            engine_version_tag: None,
        };
        let config = CloudConfig::new("123456789012", "us-west-2", "aws");
        let env = platform_environment(&deployment, "fusebit-d1-us-west-2", &config, 3001);
        assert_eq!(env["CRON_QUEUE_URL"], "https://sqs.us-west-2.amazonaws.com/123456789012/d1-cron");
        assert_eq!(env["LAMBDA_USER_FUNCTION_ROLE"], "arn:aws:iam::123456789012:role/no-permissions");
        assert_eq!(env["PORT"], "3001");
    }
}
