//! Simulated provider - In-process managers for every supported kind
//!
//! Used by the command-line demo and by tests. Identifiers are shaped like
//! the real ones but nothing leaves the process.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use serde::de::DeserializeOwned;

use super::{
    AutoScalingGroupInput, AutoScalingGroupOutput, DnsRecordSetInput, DnsRecordSetOutput,
    LaunchTemplateInput, LaunchTemplateOutput, LoadBalancerDescription, LoadBalancerInput,
    ManagerProvider, SubnetInput, SubnetOutput, VpcInput, VpcOutput,
};
use crate::manager::{ManagerError, ManagerResult, ResourceManager};
use crate::resource::ProviderId;

const REGION: &str = "sim-1";
const ACCOUNT: &str = "000000000000";

/// How one kind is simulated
pub trait SimulatedKind: Send + Sync + 'static {
    const KIND: &'static str;
    type Input: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type ProviderId: ProviderId;

    /// Identifier handed out for the `serial`-th creation
    fn provider_id(serial: u64, input: &Self::Input) -> Self::ProviderId;

    /// Remote representation after a create or update
    fn describe(id: &Self::ProviderId, input: &Self::Input, serial: u64) -> Self::Output;
}

/// Manager keeping simulated remote objects in memory
pub struct SimulatedManager<K: SimulatedKind> {
    serial: AtomicU64,
    fail_patterns: Mutex<Vec<Value>>,
    live: Mutex<BTreeMap<String, K::Output>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: SimulatedKind> Default for SimulatedManager<K> {
    fn default() -> Self {
        Self {
            serial: AtomicU64::new(0),
            fail_patterns: Mutex::new(Vec::new()),
            live: Mutex::new(BTreeMap::new()),
            _kind: PhantomData,
        }
    }
}

impl<K: SimulatedKind> SimulatedManager<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `create` whose input matches `pattern` fail
    ///
    /// Null values, empty lists and empty objects in the pattern match
    /// anything, so a null pattern fails every creation and a declared input
    /// still matches after its dependencies filled those fields in.
    pub fn fail_create_matching(&self, pattern: Value) -> ManagerResult<()> {
        self.fail_patterns
            .lock()
            .map_err(|_| ManagerError::new("failure switches poisoned").for_kind(K::KIND))?
            .push(pattern);
        Ok(())
    }

    fn refuses(&self, input: &K::Input) -> ManagerResult<bool> {
        let patterns = self
            .fail_patterns
            .lock()
            .map_err(|_| ManagerError::new("failure switches poisoned").for_kind(K::KIND))?;
        if patterns.is_empty() {
            return Ok(false);
        }
        let input = serde_json::to_value(input).map_err(|e| {
            ManagerError::new("Failed to encode input")
                .for_kind(K::KIND)
                .with_cause(e)
        })?;
        Ok(patterns.iter().any(|pattern| matches_pattern(pattern, &input)))
    }

    fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn live(&self) -> ManagerResult<MutexGuard<'_, BTreeMap<String, K::Output>>> {
        self.live
            .lock()
            .map_err(|_| ManagerError::new("simulated state poisoned").for_kind(K::KIND))
    }

    fn key(id: &K::ProviderId) -> ManagerResult<String> {
        serde_json::to_string(id)
            .map_err(|e| {
                ManagerError::new("Failed to encode provider id")
                    .for_kind(K::KIND)
                    .with_cause(e)
            })
    }
}

#[async_trait]
impl<K: SimulatedKind> ResourceManager for SimulatedManager<K> {
    type Input = K::Input;
    type Output = K::Output;
    type ProviderId = K::ProviderId;

    fn kind(&self) -> &'static str {
        K::KIND
    }

    async fn create(&self, input: &K::Input) -> ManagerResult<(K::ProviderId, K::Output)> {
        if self.refuses(input)? {
            return Err(ManagerError::new("simulated creation failure").for_kind(K::KIND));
        }
        let serial = self.next_serial();
        let id = K::provider_id(serial, input);
        let output = K::describe(&id, input, serial);
        self.live()?.insert(Self::key(&id)?, output.clone());
        log::debug!("Simulated create of {} {:?}", K::KIND, id);
        Ok((id, output))
    }

    async fn retrieve(&self, id: &K::ProviderId) -> ManagerResult<K::Output> {
        let key = Self::key(id)?;
        self.live()?
            .get(&key)
            .cloned()
            .ok_or_else(|| ManagerError::not_found(K::KIND, key))
    }

    async fn update(
        &self,
        id: &K::ProviderId,
        input: &K::Input,
    ) -> ManagerResult<(K::ProviderId, K::Output)> {
        let output = K::describe(id, input, self.next_serial());
        self.live()?.insert(Self::key(id)?, output.clone());
        Ok((id.clone(), output))
    }

    /// The simulated remote forgets everything when the process exits, so
    /// every identifier is treated as present.
    async fn delete(&self, id: &K::ProviderId) -> ManagerResult<bool> {
        self.live()?.remove(&Self::key(id)?);
        log::debug!("Simulated delete of {} {:?}", K::KIND, id);
        Ok(true)
    }
}

fn matches_pattern(pattern: &Value, actual: &Value) -> bool {
    match pattern {
        Value::Null => true,
        Value::Array(items) if items.is_empty() => true,
        Value::Object(fields) => fields.iter().all(|(key, expected)| {
            matches_pattern(expected, actual.get(key).unwrap_or(&Value::Null))
        }),
        _ => pattern == actual,
    }
}

pub struct Vpc;

impl SimulatedKind for Vpc {
    const KIND: &'static str = "vpc";
    type Input = VpcInput;
    type Output = VpcOutput;
    type ProviderId = String;

    fn provider_id(serial: u64, _input: &VpcInput) -> String {
        format!("vpc-{:017x}", serial)
    }

    fn describe(id: &String, input: &VpcInput, _serial: u64) -> VpcOutput {
        VpcOutput {
            vpc_id: id.clone(),
            cidr_block: input.cidr_block.clone(),
            state: "available".to_string(),
        }
    }
}

pub struct Subnet;

impl SimulatedKind for Subnet {
    const KIND: &'static str = "subnet";
    type Input = SubnetInput;
    type Output = SubnetOutput;
    type ProviderId = String;

    fn provider_id(serial: u64, _input: &SubnetInput) -> String {
        format!("subnet-{:017x}", serial)
    }

    fn describe(id: &String, input: &SubnetInput, _serial: u64) -> SubnetOutput {
        SubnetOutput {
            subnet_id: id.clone(),
            vpc_id: input.vpc_id.clone(),
            cidr_block: input.cidr_block.clone(),
            availability_zone: input
                .availability_zone
                .clone()
                .or_else(|| Some(format!("{}a", REGION))),
        }
    }
}

pub struct DnsRecordSet;

impl SimulatedKind for DnsRecordSet {
    const KIND: &'static str = "dns_record_set";
    type Input = DnsRecordSetInput;
    type Output = DnsRecordSetOutput;
    type ProviderId = String;

    /// Record sets have no id of their own; zone, name and type identify one
    fn provider_id(_serial: u64, input: &DnsRecordSetInput) -> String {
        format!(
            "{}/{}/{}",
            input.hosted_zone_id, input.name, input.record_type
        )
    }

    fn describe(_id: &String, _input: &DnsRecordSetInput, serial: u64) -> DnsRecordSetOutput {
        DnsRecordSetOutput {
            change_id: format!("C{:013X}", serial),
            status: "INSYNC".to_string(),
        }
    }
}

pub struct LoadBalancer;

impl SimulatedKind for LoadBalancer {
    const KIND: &'static str = "load_balancer";
    type Input = LoadBalancerInput;
    type Output = Vec<LoadBalancerDescription>;
    type ProviderId = Vec<String>;

    fn provider_id(serial: u64, input: &LoadBalancerInput) -> Vec<String> {
        vec![format!(
            "arn:aws:elasticloadbalancing:{}:{}:loadbalancer/app/{}/{:016x}",
            REGION, ACCOUNT, input.name, serial
        )]
    }

    fn describe(
        id: &Vec<String>,
        input: &LoadBalancerInput,
        _serial: u64,
    ) -> Vec<LoadBalancerDescription> {
        id.iter()
            .map(|arn| {
                let suffix = arn.rsplit('/').next().unwrap_or_default();
                LoadBalancerDescription {
                    load_balancer_arn: arn.clone(),
                    dns_name: format!("{}-{}.{}.elb.sim.internal", input.name, suffix, REGION),
                    canonical_hosted_zone_id: Some("ZSIMELB0000001".to_string()),
                    vpc_id: None,
                }
            })
            .collect()
    }
}

pub struct LaunchTemplate;

impl SimulatedKind for LaunchTemplate {
    const KIND: &'static str = "launch_template";
    type Input = LaunchTemplateInput;
    type Output = LaunchTemplateOutput;
    type ProviderId = String;

    fn provider_id(serial: u64, _input: &LaunchTemplateInput) -> String {
        format!("lt-{:017x}", serial)
    }

    fn describe(id: &String, input: &LaunchTemplateInput, _serial: u64) -> LaunchTemplateOutput {
        LaunchTemplateOutput {
            launch_template_id: id.clone(),
            launch_template_name: input.launch_template_name.clone(),
            latest_version_number: 1,
        }
    }
}

pub struct AutoScalingGroup;

impl SimulatedKind for AutoScalingGroup {
    const KIND: &'static str = "auto_scaling_group";
    type Input = AutoScalingGroupInput;
    type Output = AutoScalingGroupOutput;
    type ProviderId = String;

    /// Groups are identified by name
    fn provider_id(serial: u64, input: &AutoScalingGroupInput) -> String {
        if input.auto_scaling_group_name.trim().is_empty() {
            format!("asg-{:08x}", serial)
        } else {
            input.auto_scaling_group_name.clone()
        }
    }

    fn describe(id: &String, input: &AutoScalingGroupInput, serial: u64) -> AutoScalingGroupOutput {
        AutoScalingGroupOutput {
            auto_scaling_group_name: id.clone(),
            auto_scaling_group_arn: format!(
                "arn:aws:autoscaling:{}:{}:autoScalingGroup:{:08x}:autoScalingGroupName/{}",
                REGION, ACCOUNT, serial, id
            ),
            launch_template_id: input.launch_template_id.clone(),
            subnet_ids: input.subnet_ids.clone(),
            desired_capacity: input.desired_capacity.unwrap_or(input.min_size),
        }
    }
}

/// Provider handing out one simulated manager per kind
#[derive(Default)]
pub struct SimulatedProvider {
    vpc: Arc<SimulatedManager<Vpc>>,
    subnet: Arc<SimulatedManager<Subnet>>,
    dns_record_set: Arc<SimulatedManager<DnsRecordSet>>,
    load_balancer: Arc<SimulatedManager<LoadBalancer>>,
    launch_template: Arc<SimulatedManager<LaunchTemplate>>,
    auto_scaling_group: Arc<SimulatedManager<AutoScalingGroup>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make creation fail for inputs of `kind` matching `pattern`
    ///
    /// Returns false for an unknown kind.
    pub fn fail_create_matching(&self, kind: &str, pattern: Value) -> ManagerResult<bool> {
        match kind {
            Vpc::KIND => self.vpc.fail_create_matching(pattern)?,
            Subnet::KIND => self.subnet.fail_create_matching(pattern)?,
            DnsRecordSet::KIND => self.dns_record_set.fail_create_matching(pattern)?,
            LoadBalancer::KIND => self.load_balancer.fail_create_matching(pattern)?,
            LaunchTemplate::KIND => self.launch_template.fail_create_matching(pattern)?,
            AutoScalingGroup::KIND => self.auto_scaling_group.fail_create_matching(pattern)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

impl ManagerProvider for SimulatedProvider {
    type Vpc = SimulatedManager<Vpc>;
    type Subnet = SimulatedManager<Subnet>;
    type DnsRecordSet = SimulatedManager<DnsRecordSet>;
    type LoadBalancer = SimulatedManager<LoadBalancer>;
    type LaunchTemplate = SimulatedManager<LaunchTemplate>;
    type AutoScalingGroup = SimulatedManager<AutoScalingGroup>;

    fn vpc(&self) -> Arc<Self::Vpc> {
        Arc::clone(&self.vpc)
    }

    fn subnet(&self) -> Arc<Self::Subnet> {
        Arc::clone(&self.subnet)
    }

    fn dns_record_set(&self) -> Arc<Self::DnsRecordSet> {
        Arc::clone(&self.dns_record_set)
    }

    fn load_balancer(&self) -> Arc<Self::LoadBalancer> {
        Arc::clone(&self.load_balancer)
    }

    fn launch_template(&self) -> Arc<Self::LaunchTemplate> {
        Arc::clone(&self.launch_template)
    }

    fn auto_scaling_group(&self) -> Arc<Self::AutoScalingGroup> {
        Arc::clone(&self.auto_scaling_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_retrieve_delete() {
        let manager = SimulatedManager::<Vpc>::new();
        let input = VpcInput {
            cidr_block: "10.0.0.0/16".to_string(),
            ..VpcInput::default()
        };

        let (id, output) = manager.create(&input).await.unwrap();
        assert_eq!(id, "vpc-00000000000000001");
        assert_eq!(output.state, "available");
        assert_eq!(manager.retrieve(&id).await.unwrap(), output);

        assert!(manager.delete(&id).await.unwrap());
        assert!(manager.retrieve(&id).await.unwrap_err().not_found);
    }

    #[tokio::test]
    async fn update_keeps_identifier() {
        let manager = SimulatedManager::<Subnet>::new();
        let mut input = SubnetInput {
            cidr_block: "10.0.1.0/24".to_string(),
            ..SubnetInput::default()
        };
        let (id, _) = manager.create(&input).await.unwrap();

        input.vpc_id = Some("vpc-1".to_string());
        let (updated, output) = manager.update(&id, &input).await.unwrap();
        assert_eq!(updated, id);
        assert_eq!(output.vpc_id.as_deref(), Some("vpc-1"));
    }

    #[tokio::test]
    async fn load_balancer_id_is_a_list_of_arns() {
        let manager = SimulatedManager::<LoadBalancer>::new();
        let input = LoadBalancerInput {
            name: "web".to_string(),
            ..LoadBalancerInput::default()
        };

        let (arns, descriptions) = manager.create(&input).await.unwrap();
        assert_eq!(arns.len(), 1);
        assert!(arns[0].starts_with("arn:aws:elasticloadbalancing:sim-1:"));
        assert_eq!(descriptions[0].load_balancer_arn, arns[0]);
        assert!(descriptions[0].dns_name.starts_with("web-"));
    }

    #[tokio::test]
    async fn provider_failure_switch() {
        let provider = SimulatedProvider::new();
        assert!(provider.fail_create_matching("subnet", Value::Null).unwrap());

        let err = provider
            .subnet()
            .create(&SubnetInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "subnet: simulated creation failure");
        assert!(provider.vpc().create(&VpcInput::default()).await.is_ok());
    }

    #[tokio::test]
    async fn failure_pattern_targets_one_input() {
        let provider = SimulatedProvider::new();
        let declared = serde_json::json!({
            "cidrBlock": "10.0.1.0/24",
            "vpcId": null,
            "availabilityZone": "sim-1b"
        });
        assert!(provider.fail_create_matching("subnet", declared).unwrap());
        assert!(!provider
            .fail_create_matching("bucket", Value::Null)
            .unwrap());

        let first = SubnetInput {
            cidr_block: "10.0.0.0/24".to_string(),
            vpc_id: Some("vpc-1".to_string()),
            availability_zone: Some("sim-1a".to_string()),
        };
        assert!(provider.subnet().create(&first).await.is_ok());

        // filled-in vpc id still matches the declared pattern
        let second = SubnetInput {
            cidr_block: "10.0.1.0/24".to_string(),
            vpc_id: Some("vpc-1".to_string()),
            availability_zone: Some("sim-1b".to_string()),
        };
        assert!(provider.subnet().create(&second).await.is_err());
    }

    #[test]
    fn pattern_wildcards() {
        let actual = serde_json::json!({"name": "web", "subnets": ["subnet-1"], "scheme": null});
        assert!(matches_pattern(&serde_json::json!({"name": "web", "subnets": []}), &actual));
        assert!(!matches_pattern(&serde_json::json!({"name": "api"}), &actual));
        assert!(!matches_pattern(&serde_json::json!({"scheme": "internal"}), &actual));
        assert!(!matches_pattern(
            &serde_json::json!({"subnets": ["subnet-2"]}),
            &actual
        ));
    }
}
