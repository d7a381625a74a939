//! Cloud - Typed entry points for the supported resource kinds
//!
//! [`Cloud`] wraps an [`Engine`] and registers one manager per kind taken from
//! a [`ManagerProvider`]. Each `create_*` method declares a resource of that
//! kind; each `set_*` method wires a dependency that copies a value from the
//! dependency's persisted record into the dependent's input.

pub mod simulated;

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{ApplyReport, DestroyReport, Engine, EngineBuilder};
use crate::error::EngineResult;
use crate::lazy::ResourceHandle;
use crate::manager::{ManagerRegistry, ResourceManager, ResourceOf};
use crate::resource::ResourceId;

// ========== Virtual network ==========

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcInput {
    pub cidr_block: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcOutput {
    pub vpc_id: String,
    pub cidr_block: String,
    /// Provider lifecycle state (e.g., "available")
    pub state: String,
}

// ========== Subnet ==========

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetInput {
    pub cidr_block: String,
    /// Filled from the virtual network by [`Cloud::set_subnet_vpc`]
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetOutput {
    pub subnet_id: String,
    pub vpc_id: Option<String>,
    pub cidr_block: String,
    pub availability_zone: Option<String>,
}

// ========== DNS record set ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasTarget {
    pub dns_name: String,
    pub hosted_zone_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordSetInput {
    pub hosted_zone_id: String,
    pub name: String,
    /// Record type (e.g., "A", "CNAME")
    pub record_type: String,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub values: Vec<String>,
    /// Filled from a load balancer by [`Cloud::set_dns_record_set_load_balancer`]
    #[serde(default)]
    pub alias_target: Option<AliasTarget>,
}

/// Status of the change batch that wrote the record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordSetOutput {
    pub change_id: String,
    pub status: String,
}

// ========== Load balancer ==========

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerInput {
    pub name: String,
    #[serde(default)]
    pub scheme: Option<String>,
    /// Filled from subnets by [`Cloud::set_load_balancer_subnets`]
    #[serde(default)]
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerDescription {
    pub load_balancer_arn: String,
    pub dns_name: String,
    pub canonical_hosted_zone_id: Option<String>,
    pub vpc_id: Option<String>,
}

// ========== Launch template ==========

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateInput {
    pub launch_template_name: String,
    pub image_id: String,
    pub instance_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateOutput {
    pub launch_template_id: String,
    pub launch_template_name: String,
    pub latest_version_number: u64,
}

// ========== Auto-scaling group ==========

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingGroupInput {
    pub auto_scaling_group_name: String,
    pub min_size: u32,
    pub max_size: u32,
    #[serde(default)]
    pub desired_capacity: Option<u32>,
    /// Filled by [`Cloud::set_auto_scaling_group_launch_template`]
    #[serde(default)]
    pub launch_template_id: Option<String>,
    /// Filled by [`Cloud::set_auto_scaling_group_subnets`]
    #[serde(default)]
    pub subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingGroupOutput {
    pub auto_scaling_group_name: String,
    pub auto_scaling_group_arn: String,
    pub launch_template_id: Option<String>,
    pub subnet_ids: Vec<String>,
    pub desired_capacity: u32,
}

/// Source of fully-constructed managers, one per supported kind
///
/// Credentials and regions are the provider's business; the engine only
/// receives the managers.
pub trait ManagerProvider: Send + Sync + 'static {
    type Vpc: ResourceManager<Input = VpcInput, Output = VpcOutput, ProviderId = String>;
    type Subnet: ResourceManager<Input = SubnetInput, Output = SubnetOutput, ProviderId = String>;
    type DnsRecordSet: ResourceManager<
            Input = DnsRecordSetInput,
            Output = DnsRecordSetOutput,
            ProviderId = String,
        >;
    /// Identified by the list of load balancer ARNs
    type LoadBalancer: ResourceManager<
            Input = LoadBalancerInput,
            Output = Vec<LoadBalancerDescription>,
            ProviderId = Vec<String>,
        >;
    type LaunchTemplate: ResourceManager<
            Input = LaunchTemplateInput,
            Output = LaunchTemplateOutput,
            ProviderId = String,
        >;
    type AutoScalingGroup: ResourceManager<
            Input = AutoScalingGroupInput,
            Output = AutoScalingGroupOutput,
            ProviderId = String,
        >;

    fn vpc(&self) -> Arc<Self::Vpc>;
    fn subnet(&self) -> Arc<Self::Subnet>;
    fn dns_record_set(&self) -> Arc<Self::DnsRecordSet>;
    fn load_balancer(&self) -> Arc<Self::LoadBalancer>;
    fn launch_template(&self) -> Arc<Self::LaunchTemplate>;
    fn auto_scaling_group(&self) -> Arc<Self::AutoScalingGroup>;
}

pub type VpcHandle<P> = ResourceHandle<<P as ManagerProvider>::Vpc>;
pub type SubnetHandle<P> = ResourceHandle<<P as ManagerProvider>::Subnet>;
pub type DnsRecordSetHandle<P> = ResourceHandle<<P as ManagerProvider>::DnsRecordSet>;
pub type LoadBalancerHandle<P> = ResourceHandle<<P as ManagerProvider>::LoadBalancer>;
pub type LaunchTemplateHandle<P> = ResourceHandle<<P as ManagerProvider>::LaunchTemplate>;
pub type AutoScalingGroupHandle<P> = ResourceHandle<<P as ManagerProvider>::AutoScalingGroup>;

/// Engine bound to the managers of one provider
pub struct Cloud<P: ManagerProvider> {
    engine: Engine,
    _provider: PhantomData<fn() -> P>,
}

impl<P: ManagerProvider> Cloud<P> {
    /// Register the provider's managers and build the engine
    ///
    /// Fails if the builder lacks a planner or store, or if loading state fails.
    pub async fn new(provider: &P, builder: EngineBuilder) -> EngineResult<Self> {
        let managers = ManagerRegistry::new()
            .with(provider.vpc())
            .with(provider.subnet())
            .with(provider.dns_record_set())
            .with(provider.load_balancer())
            .with(provider.launch_template())
            .with(provider.auto_scaling_group());
        let engine = builder.managers(managers).build().await?;
        Ok(Self {
            engine,
            _provider: PhantomData,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn create_vpc(
        &mut self,
        id: impl Into<ResourceId>,
        input: VpcInput,
    ) -> EngineResult<VpcHandle<P>> {
        self.engine.create_resource::<P::Vpc>(id, input)
    }

    pub fn create_subnet(
        &mut self,
        id: impl Into<ResourceId>,
        input: SubnetInput,
    ) -> EngineResult<SubnetHandle<P>> {
        self.engine.create_resource::<P::Subnet>(id, input)
    }

    pub fn create_dns_record_set(
        &mut self,
        id: impl Into<ResourceId>,
        input: DnsRecordSetInput,
    ) -> EngineResult<DnsRecordSetHandle<P>> {
        self.engine.create_resource::<P::DnsRecordSet>(id, input)
    }

    pub fn create_load_balancer(
        &mut self,
        id: impl Into<ResourceId>,
        input: LoadBalancerInput,
    ) -> EngineResult<LoadBalancerHandle<P>> {
        self.engine.create_resource::<P::LoadBalancer>(id, input)
    }

    pub fn create_launch_template(
        &mut self,
        id: impl Into<ResourceId>,
        input: LaunchTemplateInput,
    ) -> EngineResult<LaunchTemplateHandle<P>> {
        self.engine.create_resource::<P::LaunchTemplate>(id, input)
    }

    pub fn create_auto_scaling_group(
        &mut self,
        id: impl Into<ResourceId>,
        input: AutoScalingGroupInput,
    ) -> EngineResult<AutoScalingGroupHandle<P>> {
        self.engine.create_resource::<P::AutoScalingGroup>(id, input)
    }

    /// Place the subnet in the virtual network
    pub fn set_subnet_vpc(
        &mut self,
        subnet: &SubnetHandle<P>,
        vpc: &VpcHandle<P>,
    ) -> EngineResult<()> {
        self.engine.add_dependency(
            subnet,
            vpc,
            |subnet: &mut SubnetInput, vpc: &ResourceOf<P::Vpc>| {
                subnet.vpc_id = Some(vpc.output.vpc_id.clone());
                Ok(())
            },
        )
    }

    /// Attach the load balancer to each subnet
    pub fn set_load_balancer_subnets(
        &mut self,
        load_balancer: &LoadBalancerHandle<P>,
        subnets: &[SubnetHandle<P>],
    ) -> EngineResult<()> {
        for subnet in subnets {
            self.engine.add_dependency(
                load_balancer,
                subnet,
                |lb: &mut LoadBalancerInput, subnet: &ResourceOf<P::Subnet>| {
                    push_unique(&mut lb.subnets, &subnet.provider_id);
                    Ok(())
                },
            )?;
        }
        Ok(())
    }

    /// Launch the group's instances from the template
    pub fn set_auto_scaling_group_launch_template(
        &mut self,
        group: &AutoScalingGroupHandle<P>,
        template: &LaunchTemplateHandle<P>,
    ) -> EngineResult<()> {
        self.engine.add_dependency(
            group,
            template,
            |group: &mut AutoScalingGroupInput, template: &ResourceOf<P::LaunchTemplate>| {
                group.launch_template_id = Some(template.provider_id.clone());
                Ok(())
            },
        )
    }

    /// Spread the group over each subnet
    pub fn set_auto_scaling_group_subnets(
        &mut self,
        group: &AutoScalingGroupHandle<P>,
        subnets: &[SubnetHandle<P>],
    ) -> EngineResult<()> {
        for subnet in subnets {
            self.engine.add_dependency(
                group,
                subnet,
                |group: &mut AutoScalingGroupInput, subnet: &ResourceOf<P::Subnet>| {
                    push_unique(&mut group.subnet_ids, &subnet.provider_id);
                    Ok(())
                },
            )?;
        }
        Ok(())
    }

    /// Alias the record set to the load balancer's DNS name
    pub fn set_dns_record_set_load_balancer(
        &mut self,
        record_set: &DnsRecordSetHandle<P>,
        load_balancer: &LoadBalancerHandle<P>,
    ) -> EngineResult<()> {
        self.engine.add_dependency(
            record_set,
            load_balancer,
            |record: &mut DnsRecordSetInput, lb: &ResourceOf<P::LoadBalancer>| {
                let description = lb.output.first().ok_or_else(|| {
                    format!("load balancer {} has no description", lb.id)
                })?;
                record.alias_target = Some(AliasTarget {
                    dns_name: description.dns_name.clone(),
                    hosted_zone_id: description.canonical_hosted_zone_id.clone(),
                });
                Ok(())
            },
        )
    }

    pub fn plan(&self) -> EngineResult<Vec<ResourceId>> {
        self.engine.plan()
    }

    pub async fn apply(&mut self) -> EngineResult<ApplyReport> {
        self.engine.apply().await
    }

    pub async fn destroy(&mut self) -> EngineResult<DestroyReport> {
        self.engine.destroy().await
    }

    pub async fn save(&self) -> EngineResult<()> {
        self.engine.save().await
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::simulated::SimulatedProvider;
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::engine::EngineConfig;
    use crate::error::EngineError;
    use crate::planner::DependencyPlanner;
    use crate::store::{ResourceStore, ResourceStorer};

    fn builder(backend: &MemoryBackend) -> EngineBuilder {
        Engine::builder()
            .planner(DependencyPlanner::new())
            .store(ResourceStore::new(backend.clone()))
    }

    fn subnet(cidr: &str) -> SubnetInput {
        SubnetInput {
            cidr_block: cidr.to_string(),
            ..SubnetInput::default()
        }
    }

    #[tokio::test]
    async fn subnet_receives_vpc_id() {
        let backend = MemoryBackend::new();
        let provider = SimulatedProvider::new();
        let mut cloud = Cloud::new(&provider, builder(&backend)).await.unwrap();

        let vpc = cloud
            .create_vpc(
                "myvpc",
                VpcInput {
                    cidr_block: "10.0.0.0/16".to_string(),
                    ..VpcInput::default()
                },
            )
            .unwrap();
        let mysubnet = cloud.create_subnet("mysubnet", subnet("10.0.0.0/24")).unwrap();
        cloud.set_subnet_vpc(&mysubnet, &vpc).unwrap();

        cloud.apply().await.unwrap();

        let vpc = cloud.engine().resource(&vpc).unwrap();
        let mysubnet = cloud.engine().resource(&mysubnet).unwrap();
        assert_eq!(vpc.output.state, "available");
        assert_eq!(mysubnet.input.vpc_id.as_ref(), Some(&vpc.provider_id));
        assert_eq!(mysubnet.output.vpc_id.as_ref(), Some(&vpc.provider_id));
    }

    #[tokio::test]
    async fn full_stack_wires_every_kind() {
        let backend = MemoryBackend::new();
        let provider = SimulatedProvider::new();
        let mut cloud = Cloud::new(&provider, builder(&backend)).await.unwrap();

        // declared dependents first; the planner reorders them
        let dns = cloud
            .create_dns_record_set(
                "www",
                DnsRecordSetInput {
                    hosted_zone_id: "Z123".to_string(),
                    name: "www.example.com".to_string(),
                    record_type: "A".to_string(),
                    ..DnsRecordSetInput::default()
                },
            )
            .unwrap();
        let asg = cloud
            .create_auto_scaling_group(
                "web",
                AutoScalingGroupInput {
                    auto_scaling_group_name: "web".to_string(),
                    min_size: 1,
                    max_size: 3,
                    ..AutoScalingGroupInput::default()
                },
            )
            .unwrap();
        let lb = cloud
            .create_load_balancer(
                "lb",
                LoadBalancerInput {
                    name: "web-lb".to_string(),
                    ..LoadBalancerInput::default()
                },
            )
            .unwrap();
        let lt = cloud
            .create_launch_template(
                "lt",
                LaunchTemplateInput {
                    launch_template_name: "web".to_string(),
                    image_id: "ami-123".to_string(),
                    instance_type: "t3.micro".to_string(),
                },
            )
            .unwrap();
        let vpc = cloud
            .create_vpc(
                "vpc",
                VpcInput {
                    cidr_block: "10.0.0.0/16".to_string(),
                    ..VpcInput::default()
                },
            )
            .unwrap();
        let a = cloud.create_subnet("subnet-a", subnet("10.0.1.0/24")).unwrap();
        let b = cloud.create_subnet("subnet-b", subnet("10.0.2.0/24")).unwrap();

        cloud.set_subnet_vpc(&a, &vpc).unwrap();
        cloud.set_subnet_vpc(&b, &vpc).unwrap();
        cloud
            .set_load_balancer_subnets(&lb, &[a.clone(), b.clone()])
            .unwrap();
        cloud
            .set_auto_scaling_group_launch_template(&asg, &lt)
            .unwrap();
        cloud
            .set_auto_scaling_group_subnets(&asg, &[a.clone(), b.clone()])
            .unwrap();
        cloud.set_dns_record_set_load_balancer(&dns, &lb).unwrap();

        let order: Vec<String> = cloud
            .plan()
            .unwrap()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(
            order,
            vec!["lt", "vpc", "subnet-a", "subnet-b", "web", "lb", "www"]
        );

        let report = cloud.apply().await.unwrap();
        assert_eq!(report.count(crate::lazy::CreateOutcome::Created), 7);

        let engine = cloud.engine();
        let a = engine.resource(&a).unwrap();
        let b = engine.resource(&b).unwrap();
        let lb = engine.resource(&lb).unwrap();
        let asg = engine.resource(&asg).unwrap();
        let dns = engine.resource(&dns).unwrap();
        let lt = engine.resource(&lt).unwrap();

        assert_eq!(lb.input.subnets, vec![a.provider_id.clone(), b.provider_id.clone()]);
        assert_eq!(lb.provider_id.len(), 1);
        assert_eq!(asg.input.launch_template_id.as_ref(), Some(&lt.provider_id));
        assert_eq!(asg.input.subnet_ids, vec![a.provider_id, b.provider_id]);
        assert_eq!(
            dns.input.alias_target.as_ref().map(|t| t.dns_name.as_str()),
            Some(lb.output[0].dns_name.as_str())
        );
    }

    #[tokio::test]
    async fn second_run_updates_existing_records() {
        let backend = MemoryBackend::new();
        let provider = SimulatedProvider::new();

        let mut first = Cloud::new(&provider, builder(&backend)).await.unwrap();
        let vpc = first
            .create_vpc("vpc", VpcInput::default())
            .unwrap();
        first.apply().await.unwrap();
        let created = first.engine().resource(&vpc).unwrap();

        let mut second = Cloud::new(&provider, builder(&backend)).await.unwrap();
        let vpc = second
            .create_vpc("vpc", VpcInput::default())
            .unwrap();
        let report = second.apply().await.unwrap();

        assert_eq!(
            report.outcome(vpc.id()),
            Some(crate::lazy::CreateOutcome::Updated)
        );
        assert_eq!(
            second.engine().resource(&vpc).unwrap().provider_id,
            created.provider_id
        );
    }

    #[tokio::test]
    async fn dns_alias_requires_a_described_load_balancer() {
        let backend = MemoryBackend::new();
        let provider = SimulatedProvider::new();
        let config = EngineConfig {
            skip_unchanged: true,
            ..EngineConfig::default()
        };
        let mut cloud = Cloud::new(&provider, builder(&backend).config(config))
            .await
            .unwrap();

        let lb = cloud
            .create_load_balancer("lb", LoadBalancerInput::default())
            .unwrap();
        let dns = cloud
            .create_dns_record_set("www", DnsRecordSetInput::default())
            .unwrap();
        cloud.set_dns_record_set_load_balancer(&dns, &lb).unwrap();
        cloud.apply().await.unwrap();

        // the load balancer is left unchanged, but its record lists nothing
        let mut record = cloud.engine().resource(&lb).unwrap();
        record.output.clear();
        cloud
            .engine()
            .store()
            .set(lb.id(), record.to_json().unwrap())
            .unwrap();

        let err = cloud.apply().await.unwrap_err();
        assert!(matches!(err, EngineError::DependencyApply { ref target, .. } if target.as_str() == "lb"));
    }

    #[test]
    fn payloads_use_camel_case() {
        let input = AutoScalingGroupInput {
            auto_scaling_group_name: "web".to_string(),
            min_size: 1,
            max_size: 2,
            ..AutoScalingGroupInput::default()
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["autoScalingGroupName"], "web");
        assert_eq!(json["minSize"], 1);

        let parsed: SubnetInput = serde_json::from_str(r#"{"cidrBlock": "10.0.0.0/24"}"#).unwrap();
        assert_eq!(parsed.vpc_id, None);
    }

    #[test]
    fn push_unique_skips_repeats() {
        let mut values = vec!["a".to_string()];
        push_unique(&mut values, "a");
        push_unique(&mut values, "b");
        assert_eq!(values, vec!["a", "b"]);
    }
}
