use lazy_static::lazy_static;
use regex::Regex;

use crate::model::TaggedResource;

/// Post-processing hook over the discovered resource list.
pub type FilterFunc = fn(&mut Vec<TaggedResource>);

/// One supported namespace: which resource types the tagging API should
/// list for it, and how to read dimension values out of an ARN. Capture
/// group names are dimension names with underscores standing in for
/// spaces (regex groups cannot carry spaces).
pub struct ServiceConfig {
    pub namespace: &'static str,
    pub resource_filters: &'static [&'static str],
    pub dimension_regexps: Vec<Regex>,
    pub filter_func: Option<FilterFunc>,
}

fn service(
    namespace: &'static str,
    resource_filters: &'static [&'static str],
    regexps: &[&str],
    filter_func: Option<FilterFunc>,
) -> ServiceConfig {
    ServiceConfig {
        namespace,
        resource_filters,
        dimension_regexps: regexps
            .iter()
            .map(|r| Regex::new(r).expect("invalid dimension regexp"))
            .collect(),
        filter_func,
    }
}

/// State-machine executions get tagged alongside their machine but own no
/// metric series; drop them so the associator only sees machines.
fn filter_states(resources: &mut Vec<TaggedResource>) {
    resources.retain(|r| !r.arn.contains(":execution:"));
}

lazy_static! {
    pub static ref SERVICES: Vec<ServiceConfig> = vec![
        service(
            "AWS/EC2",
            &["ec2:instance"],
            &[r"instance/(?P<InstanceId>[^/]+)$"],
            None,
        ),
        service(
            "AWS/EBS",
            &["ec2:volume"],
            &[r"volume/(?P<VolumeId>[^/]+)$"],
            None,
        ),
        service(
            "AWS/ECS",
            &["ecs:cluster", "ecs:service"],
            &[
                r"service/(?P<ClusterName>[^/]+)/(?P<ServiceName>[^/]+)$",
                r"cluster/(?P<ClusterName>[^/]+)$",
            ],
            None,
        ),
        service(
            "ECS/ContainerInsights",
            &["ecs:cluster", "ecs:service"],
            &[
                r"service/(?P<ClusterName>[^/]+)/(?P<ServiceName>[^/]+)$",
                r"cluster/(?P<ClusterName>[^/]+)$",
            ],
            None,
        ),
        service(
            "AWS/ELB",
            &["elasticloadbalancing:loadbalancer"],
            &[r"loadbalancer/(?P<LoadBalancerName>.+)$"],
            None,
        ),
        service(
            "AWS/ApplicationELB",
            &[
                "elasticloadbalancing:loadbalancer/app",
                "elasticloadbalancing:targetgroup",
            ],
            &[
                r"(?P<TargetGroup>targetgroup/[^/]+/[^/]+)$",
                r"loadbalancer/(?P<LoadBalancer>app/[^/]+/[^/]+)$",
            ],
            None,
        ),
        service(
            "AWS/NetworkELB",
            &[
                "elasticloadbalancing:loadbalancer/net",
                "elasticloadbalancing:targetgroup",
            ],
            &[
                r"(?P<TargetGroup>targetgroup/[^/]+/[^/]+)$",
                r"loadbalancer/(?P<LoadBalancer>net/[^/]+/[^/]+)$",
            ],
            None,
        ),
        service(
            "AWS/Lambda",
            &["lambda:function"],
            &[r"function:(?P<FunctionName>[^:]+)$"],
            None,
        ),
        service(
            "AWS/RDS",
            &["rds:db", "rds:cluster"],
            &[
                r"cluster:(?P<DBClusterIdentifier>[^:]+)$",
                r"db:(?P<DBInstanceIdentifier>[^:]+)$",
            ],
            None,
        ),
        service("AWS/SQS", &["sqs"], &[r"(?P<QueueName>[^:]+)$"], None),
        service("AWS/SNS", &["sns"], &[r"(?P<TopicName>[^:]+)$"], None),
        service(
            "AWS/DynamoDB",
            &["dynamodb:table"],
            &[r"table/(?P<TableName>[^/]+)$"],
            None,
        ),
        service("AWS/S3", &["s3"], &[r"(?P<BucketName>[^:]+)$"], None),
        service(
            "AWS/ApiGateway",
            &["apigateway"],
            &[
                r"/restapis/(?P<ApiName>[^/]+)$",
                r"/apis/(?P<ApiName>[^/]+)$",
            ],
            None,
        ),
        service(
            "AWS/CloudFront",
            &["cloudfront:distribution"],
            &[r"distribution/(?P<DistributionId>[^/]+)$"],
            None,
        ),
        service(
            "AWS/ElastiCache",
            &["elasticache:cluster"],
            &[r"cluster:(?P<CacheClusterId>[^:]+)$"],
            None,
        ),
        service(
            "AWS/EFS",
            &["elasticfilesystem:file-system"],
            &[r"file-system/(?P<FileSystemId>[^/]+)$"],
            None,
        ),
        service(
            "AWS/Firehose",
            &["firehose"],
            &[r"deliverystream/(?P<DeliveryStreamName>[^/]+)$"],
            None,
        ),
        service(
            "AWS/Kinesis",
            &["kinesis:stream"],
            &[r"stream/(?P<StreamName>[^/]+)$"],
            None,
        ),
        service(
            "AWS/Redshift",
            &["redshift:cluster"],
            &[r"cluster:(?P<ClusterIdentifier>[^:]+)$"],
            None,
        ),
        service(
            "AWS/States",
            &["states"],
            &[r"(?P<StateMachineArn>.*)"],
            Some(filter_states),
        ),
        service(
            "AWS/ES",
            &["es:domain"],
            &[r"domain/(?P<DomainName>[^/]+)$"],
            None,
        ),
        service(
            "AWS/NATGateway",
            &["ec2:natgateway"],
            &[r"natgateway/(?P<NatGatewayId>[^/]+)$"],
            None,
        ),
        service(
            "AWS/VPN",
            &["ec2:vpn-connection"],
            &[r"vpn-connection/(?P<VpnId>[^/]+)$"],
            None,
        ),
        service(
            "AWS/DocDB",
            &["rds:db", "rds:cluster"],
            &[
                r"cluster:(?P<DBClusterIdentifier>[^:]+)$",
                r"db:(?P<DBInstanceIdentifier>[^:]+)$",
            ],
            None,
        ),
        service(
            "AWS/Kafka",
            &["kafka:cluster"],
            &[r"cluster/(?P<Cluster_Name>[^/]+)/"],
            None,
        ),
        service("AWS/MQ", &["mq:broker"], &[r"broker:(?P<Broker>[^:]+)$"], None),
        service(
            "AWS/FSx",
            &["fsx:file-system"],
            &[r"file-system/(?P<FileSystemId>[^/]+)$"],
            None,
        ),
        service(
            "AWS/WAFV2",
            &["wafv2"],
            &[r"/webacl/(?P<WebACL>[^/]+)/"],
            None,
        ),
    ];
}

pub fn service_for(namespace: &str) -> Option<&'static ServiceConfig> {
    SERVICES.iter().find(|s| s.namespace == namespace)
}
