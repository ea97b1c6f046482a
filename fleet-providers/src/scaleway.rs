use crate::ComputeProvider;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_common::{
    states, IncompleteCreate, InstanceState, RemoteSnapshot, RunInstancesRequest, SecurityGroupRef, Tag, VolumeSpec,
    NAME_TAG,
};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_API_URL: &str = "https://api.scaleway.com";

/// Scaleway Instance API adapter. The `region` argument of every call is used as the zone
/// (e.g. `fr-par-2`), since Scaleway servers are zone-scoped.
pub struct ScalewayProvider {
    client: Client,
    base_url: String,
    project_id: String,
    secret_key: String,
}

impl ScalewayProvider {
    pub fn new(project_id: String, secret_key: String) -> Result<Self> {
        // Default reqwest client has no overall timeout. If Scaleway stalls, a poll would hang forever.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_API_URL.to_string(),
            project_id: project_id.trim().to_string(),
            secret_key: secret_key.trim().to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-Auth-Token",
            reqwest::header::HeaderValue::from_str(&self.secret_key)?,
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        Ok(headers)
    }

    fn servers_url(&self, zone: &str) -> String {
        format!("{}/instance/v1/zones/{}/servers", self.base_url, zone)
    }

    fn server_url(&self, zone: &str, server_id: &str) -> String {
        format!("{}/{}", self.servers_url(zone), server_id)
    }

    async fn fetch_server(&self, zone: &str, server_id: &str) -> Result<Option<Value>> {
        let url = self.server_url(zone, server_id);
        debug!("[Scaleway API] GET {}", url);

        let resp = self.client.get(&url).headers(self.headers()?).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!("[Scaleway API] GET {} - server not found", url);
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(
                "[Scaleway API] GET {} failed: status={}, response={}",
                url,
                status.as_u16(),
                text
            );
            return Err(anyhow::anyhow!(
                "Scaleway get server failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }

        let json_resp: Value = resp.json().await?;
        Ok(Some(json_resp["server"].clone()))
    }

    async fn server_action(&self, zone: &str, server_id: &str, action: &str) -> Result<()> {
        let url = format!("{}/action", self.server_url(zone, server_id));
        let body = json!({ "action": action });
        info!(
            "[Scaleway API] POST {} - action={}, server_id={}, zone={}",
            url, action, server_id, zone
        );

        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(
                "[Scaleway API] POST {} failed: status={}, response={}",
                url,
                status.as_u16(),
                text
            );
            return Err(anyhow::anyhow!(
                "Scaleway {} failed: status={} body={}",
                action,
                status.as_u16(),
                text
            ));
        }
        Ok(())
    }

    async fn set_cloud_init(&self, zone: &str, server_id: &str, cloud_init: &[u8]) -> Result<()> {
        let url = format!("{}/user_data/cloud-init", self.server_url(zone, server_id));
        info!(
            "[Scaleway API] PUT {} - cloud-init ({} bytes)",
            url,
            cloud_init.len()
        );

        let resp = self
            .client
            .put(&url)
            .header("X-Auth-Token", self.secret_key.as_str())
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(cloud_init.to_vec())
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Scaleway set cloud-init failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }
        Ok(())
    }

    fn create_body(&self, request: &RunInstancesRequest) -> Value {
        let mut body = json!({
            "name": request.name,
            "commercial_type": request.instance_type,
            "image": request.image_id,
            "project": self.project_id,
            "tags": [encode_tag(&Tag::name(request.name.as_str()))],
            "dynamic_ip_required": true,
            "protected": request.disable_api_termination,
        });
        if let Some(group) = request.security_groups.first() {
            body["security_group"] = json!(group);
            if request.security_groups.len() > 1 {
                debug!(
                    "[Scaleway API] only one security group per server, ignoring {:?}",
                    &request.security_groups[1..]
                );
            }
        }
        if let Some(group) = &request.placement_group {
            body["placement_group"] = json!(group);
        }
        if !request.key_name.is_empty() {
            debug!(
                "[Scaleway API] key_name={} ignored (SSH keys are managed at project level)",
                request.key_name
            );
        }
        if !request.subnet_id.is_empty() {
            debug!("[Scaleway API] subnet_id={} ignored", request.subnet_id);
        }
        if let Some(behavior) = &request.shutdown_behavior {
            debug!("[Scaleway API] shutdown_behavior={} ignored", behavior);
        }
        body
    }
}

fn encode_tag(tag: &Tag) -> String {
    format!("{}={}", tag.key, tag.value)
}

fn decode_tag(raw: &str) -> Tag {
    match raw.split_once('=') {
        Some((key, value)) => Tag::new(key, value),
        None => Tag::new(raw, ""),
    }
}

/// Block storage sizes are expressed in bytes (decimal gigabytes).
fn size_bytes(size_gb: u64) -> Result<u64> {
    size_gb
        .checked_mul(1_000_000_000)
        .ok_or_else(|| anyhow::anyhow!("volume size of {} GB does not fit in bytes", size_gb))
}

/// Scaleway state names mapped onto the provider-neutral vocabulary.
fn map_state(raw: &str) -> String {
    match raw {
        "starting" => states::PENDING.to_string(),
        "running" => states::RUNNING.to_string(),
        "stopping" => states::STOPPING.to_string(),
        "stopped" | "stopped in place" => states::STOPPED.to_string(),
        other => other.to_string(),
    }
}

fn server_to_snapshot(server: &Value) -> Result<RemoteSnapshot> {
    let instance_id = server["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("No server id in response"))?
        .to_string();
    let str_field = |v: &Value| v.as_str().unwrap_or_default().to_string();

    let mut tags: Vec<Tag> = server["tags"]
        .as_array()
        .map(|raw| raw.iter().filter_map(Value::as_str).map(decode_tag).collect())
        .unwrap_or_default();
    // The server name is the source of truth for the Name tag.
    if let Some(name) = server["name"].as_str().filter(|n| !n.is_empty()) {
        tags.retain(|tag| tag.key != NAME_TAG);
        tags.insert(0, Tag::name(name));
    }

    let security_groups = match server["security_group"]["id"].as_str() {
        Some(id) => vec![SecurityGroupRef {
            id: id.to_string(),
            name: server["security_group"]["name"].as_str().map(str::to_string),
        }],
        None => Vec::new(),
    };

    Ok(RemoteSnapshot {
        instance_id,
        instance_type: str_field(&server["commercial_type"]),
        image_id: str_field(&server["image"]["id"]),
        subnet_id: String::new(),
        key_name: String::new(),
        availability_zone: str_field(&server["zone"]),
        ebs_optimized: false,
        security_groups,
        state: InstanceState::named(map_state(server["state"].as_str().unwrap_or_default())),
        tags,
        private_ip_address: server["private_ip"].as_str().map(str::to_string),
        public_ip_address: server["public_ip"]["address"].as_str().map(str::to_string),
        placement_group: server["placement_group"]["id"].as_str().map(str::to_string),
        launch_time: server["creation_date"]
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc)),
    })
}

#[async_trait]
impl ComputeProvider for ScalewayProvider {
    async fn describe_instances(
        &self,
        region: &str,
        instance_ids: &[String],
    ) -> Result<Vec<RemoteSnapshot>> {
        let mut found = Vec::with_capacity(instance_ids.len());
        for id in instance_ids {
            if let Some(server) = self.fetch_server(region, id).await? {
                found.push(server_to_snapshot(&server)?);
            }
        }
        Ok(found)
    }

    async fn run_instances(
        &self,
        region: &str,
        request: &RunInstancesRequest,
    ) -> Result<Vec<RemoteSnapshot>> {
        let url = self.servers_url(region);
        let body = self.create_body(request);
        info!(
            "[Scaleway API] POST {} - Creating instance: type={}, image={}, zone={}, has_cloud_init={}",
            url,
            request.instance_type,
            request.image_id,
            region,
            request.user_data.is_some()
        );
        debug!(
            "[Scaleway API] Request payload: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(
                "[Scaleway API] POST {} failed: status={}, response={}",
                url,
                status.as_u16(),
                text
            );
            return Err(anyhow::anyhow!(
                "Scaleway create_instance failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }

        let json_resp: Value = resp.json().await?;
        if json_resp["server"].is_null() {
            return Ok(Vec::new());
        }
        let mut snapshot = server_to_snapshot(&json_resp["server"])?;
        info!(
            "[Scaleway API] Server created: id={}, zone={}",
            snapshot.instance_id, region
        );

        let incomplete = |stage: &'static str, source: anyhow::Error| IncompleteCreate {
            instance_id: snapshot.instance_id.clone(),
            stage,
            source,
        };
        if let Some(user_data) = &request.user_data {
            self.set_cloud_init(region, &snapshot.instance_id, user_data)
                .await
                .map_err(|e| incomplete("cloud-init", e))?;
        }
        self.server_action(region, &snapshot.instance_id, "poweron")
            .await
            .map_err(|e| incomplete("poweron", e))?;
        snapshot.state = InstanceState::named(states::PENDING);

        Ok(vec![snapshot])
    }

    async fn create_tags(
        &self,
        region: &str,
        instance_ids: &[String],
        tags: &[Tag],
    ) -> Result<()> {
        for id in instance_ids {
            let server = self
                .fetch_server(region, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Scaleway server {} not found", id))?;
            let mut merged: Vec<Tag> = server["tags"]
                .as_array()
                .map(|raw| raw.iter().filter_map(Value::as_str).map(decode_tag).collect())
                .unwrap_or_default();
            for tag in tags {
                match merged.iter_mut().find(|t| t.key == tag.key) {
                    Some(existing) => existing.value = tag.value.clone(),
                    None => merged.push(tag.clone()),
                }
            }

            let mut body = json!({
                "tags": merged.iter().map(encode_tag).collect::<Vec<_>>(),
            });
            if let Some(name) = tags.iter().find(|t| t.key == NAME_TAG) {
                body["name"] = json!(name.value);
            }

            let url = self.server_url(region, id);
            info!("[Scaleway API] PATCH {} - tags={}", url, body["tags"]);
            let resp = self
                .client
                .patch(&url)
                .headers(self.headers()?)
                .json(&body)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(anyhow::anyhow!(
                    "Scaleway update tags failed: status={} body={}",
                    status.as_u16(),
                    text
                ));
            }
        }
        Ok(())
    }

    async fn terminate_instances(&self, region: &str, instance_ids: &[String]) -> Result<()> {
        for id in instance_ids {
            // `terminate` powers off and deletes the server together with its local volumes.
            self.server_action(region, id, "terminate").await?;
        }
        Ok(())
    }

    async fn reboot_instances(&self, region: &str, instance_ids: &[String]) -> Result<()> {
        for id in instance_ids {
            self.server_action(region, id, "reboot").await?;
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        region: &str,
        zone: &str,
        volume: &VolumeSpec,
    ) -> Result<Option<String>> {
        let zone = if zone.is_empty() { region } else { zone };
        let url = format!("{}/block/v1alpha1/zones/{}/volumes", self.base_url, zone);
        let mut body = json!({
            "name": volume.name,
            "project_id": self.project_id,
            "from_empty": { "size": size_bytes(volume.size_gb)? },
        });
        if let Some(iops) = volume.iops {
            body["perf_iops"] = json!(iops);
        }
        info!(
            "[Scaleway API] POST {} - Creating volume: name={}, size={}GB",
            url, volume.name, volume.size_gb
        );

        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Scaleway create volume failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }
        let json_resp: Value = resp.json().await?;
        let volume_id = json_resp["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("No volume id in create response"))?;
        Ok(Some(volume_id.to_string()))
    }

    async fn attach_volume(
        &self,
        region: &str,
        instance_id: &str,
        volume_id: &str,
        device: Option<&str>,
    ) -> Result<bool> {
        let url = format!("{}/attach-volume", self.server_url(region, instance_id));
        let body = json!({ "volume_id": volume_id, "volume_type": "sbs_volume" });
        if let Some(device) = device {
            debug!("[Scaleway API] device={} ignored, Scaleway assigns it", device);
        }
        info!(
            "[Scaleway API] POST {} - Attaching volume {} to {}",
            url, volume_id, instance_id
        );

        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Scaleway attach volume failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }
        Ok(true)
    }
}
