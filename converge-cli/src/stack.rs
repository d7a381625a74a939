//! Demo stack: a small web tier touching every resource kind

use std::collections::BTreeMap;

use converge_core::cloud::{
    AutoScalingGroupInput, Cloud, DnsRecordSetInput, LaunchTemplateInput, LoadBalancerInput,
    ManagerProvider, SubnetInput, VpcInput,
};
use converge_core::error::EngineResult;

/// Declare the stack and wire its dependencies
///
/// Dependents are declared before what they depend on on purpose; the
/// planner sorts them out.
pub fn declare<P: ManagerProvider>(cloud: &mut Cloud<P>) -> EngineResult<()> {
    let dns = cloud.create_dns_record_set(
        "mydns",
        DnsRecordSetInput {
            hosted_zone_id: "ZSIMZONE000001".to_string(),
            name: "www.example.internal".to_string(),
            record_type: "A".to_string(),
            ..DnsRecordSetInput::default()
        },
    )?;
    let asg = cloud.create_auto_scaling_group(
        "myasg",
        AutoScalingGroupInput {
            auto_scaling_group_name: "web".to_string(),
            min_size: 1,
            max_size: 3,
            desired_capacity: Some(2),
            ..AutoScalingGroupInput::default()
        },
    )?;
    let lb = cloud.create_load_balancer(
        "myloadbalancer",
        LoadBalancerInput {
            name: "web".to_string(),
            scheme: Some("internet-facing".to_string()),
            ..LoadBalancerInput::default()
        },
    )?;
    let lt = cloud.create_launch_template(
        "mylaunchtemplate",
        LaunchTemplateInput {
            launch_template_name: "web".to_string(),
            image_id: "ami-0sim0000000000001".to_string(),
            instance_type: "t3.micro".to_string(),
        },
    )?;
    let vpc = cloud.create_vpc(
        "myvpc",
        VpcInput {
            cidr_block: "10.0.0.0/16".to_string(),
            tags: BTreeMap::from([("Name".to_string(), "myvpc".to_string())]),
        },
    )?;
    let subnet_a = cloud.create_subnet(
        "mysubnet-a",
        SubnetInput {
            cidr_block: "10.0.0.0/24".to_string(),
            availability_zone: Some("sim-1a".to_string()),
            ..SubnetInput::default()
        },
    )?;
    let subnet_b = cloud.create_subnet(
        "mysubnet-b",
        SubnetInput {
            cidr_block: "10.0.1.0/24".to_string(),
            availability_zone: Some("sim-1b".to_string()),
            ..SubnetInput::default()
        },
    )?;

    let subnets = [subnet_a.clone(), subnet_b.clone()];
    cloud.set_subnet_vpc(&subnet_a, &vpc)?;
    cloud.set_subnet_vpc(&subnet_b, &vpc)?;
    cloud.set_load_balancer_subnets(&lb, &subnets)?;
    cloud.set_auto_scaling_group_launch_template(&asg, &lt)?;
    cloud.set_auto_scaling_group_subnets(&asg, &subnets)?;
    cloud.set_dns_record_set_load_balancer(&dns, &lb)?;
    Ok(())
}
