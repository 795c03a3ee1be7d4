//! The built-in `kubernetes` schema: resources for the common resource
//! kinds and code-defined tables over the raw API objects. Status
//! derivation beyond raw fields (kubectl's tabular STATUS column) belongs
//! to the external adapter, not to these tables.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::tables::{coerce, BuiltinTable};
use crate::{BuiltinSchema, KubernetesResource, Registry, Resource, ResourceKind};
use models::ColumnType;

pub(crate) fn register(registry: &mut Registry) {
    registry.add_builtin(
        "kubernetes",
        BuiltinSchema {
            default_kind: Some(ResourceKind::Kubernetes),
            resources: vec![
                kube_resource("pods", true, true),
                kube_resource("jobs", true, true),
                kube_resource("nodes", false, true),
                // Events churn too fast for snapshots to be useful.
                kube_resource("events", true, false),
            ],
            tables: vec![&PODS, &JOBS, &NODES, &TAINTS],
        },
    );
}

fn kube_resource(name: &str, namespaced: bool, cacheable: bool) -> Resource {
    Resource::Kubernetes(KubernetesResource {
        name: name.to_string(),
        namespaced,
        cacheable,
    })
}

static PODS: BuiltinTable = BuiltinTable {
    name: "pods",
    resource: "pods",
    columns: &[
        ("name", ColumnType::Text),
        ("namespace", ColumnType::Text),
        ("node_name", ColumnType::Text),
        ("creation_ts", ColumnType::Date),
        ("is_daemon", ColumnType::Integer),
        ("phase", ColumnType::Text),
        ("cpu_req", ColumnType::Cpu),
        ("gpu_req", ColumnType::Cpu),
        ("mem_req", ColumnType::Size),
        ("cpu_lim", ColumnType::Cpu),
        ("gpu_lim", ColumnType::Cpu),
        ("mem_lim", ColumnType::Size),
    ],
    make_rows: pod_rows,
};

fn pod_rows(doc: &Value) -> Vec<(&Value, Vec<SqlValue>)> {
    items(doc)
        .map(|pod| {
            let is_daemon = pod
                .pointer("/metadata/ownerReferences")
                .and_then(Value::as_array)
                .map(|owners| {
                    owners
                        .iter()
                        .any(|o| o.get("kind").and_then(Value::as_str) == Some("DaemonSet"))
                })
                .unwrap_or(false);
            let containers = pod.pointer("/spec/containers");
            let mut row = vec![
                text(pod.pointer("/metadata/name")),
                text(pod.pointer("/metadata/namespace")),
                text(pod.pointer("/spec/nodeName")),
                date(pod.pointer("/metadata/creationTimestamp")),
                SqlValue::Integer(is_daemon as i64),
                text(pod.pointer("/status/phase")),
            ];
            row.extend(sum_resources(containers, "requests").columns());
            row.extend(sum_resources(containers, "limits").columns());
            (pod, row)
        })
        .collect()
}

static JOBS: BuiltinTable = BuiltinTable {
    name: "jobs",
    resource: "jobs",
    columns: &[
        ("name", ColumnType::Text),
        ("namespace", ColumnType::Text),
        ("creation_ts", ColumnType::Date),
        ("active", ColumnType::Integer),
        ("cpu_req", ColumnType::Cpu),
        ("gpu_req", ColumnType::Cpu),
        ("mem_req", ColumnType::Size),
        ("cpu_lim", ColumnType::Cpu),
        ("gpu_lim", ColumnType::Cpu),
        ("mem_lim", ColumnType::Size),
    ],
    make_rows: job_rows,
};

fn job_rows(doc: &Value) -> Vec<(&Value, Vec<SqlValue>)> {
    items(doc)
        .map(|job| {
            let containers = job.pointer("/spec/template/spec/containers");
            let mut row = vec![
                text(job.pointer("/metadata/name")),
                text(job.pointer("/metadata/namespace")),
                date(job.pointer("/metadata/creationTimestamp")),
                coerce(ColumnType::Integer, job.pointer("/status/active")),
            ];
            row.extend(sum_resources(containers, "requests").columns());
            row.extend(sum_resources(containers, "limits").columns());
            (job, row)
        })
        .collect()
}

static NODES: BuiltinTable = BuiltinTable {
    name: "nodes",
    resource: "nodes",
    columns: &[
        ("name", ColumnType::Text),
        ("instance_type", ColumnType::Text),
        ("cpu_alloc", ColumnType::Cpu),
        ("mem_alloc", ColumnType::Size),
        ("cpu_cap", ColumnType::Cpu),
        ("mem_cap", ColumnType::Size),
    ],
    make_rows: node_rows,
};

fn node_rows(doc: &Value) -> Vec<(&Value, Vec<SqlValue>)> {
    items(doc)
        .map(|node| {
            let instance_type = node
                .pointer("/metadata/labels/node.kubernetes.io~1instance-type")
                .or_else(|| node.pointer("/metadata/labels/beta.kubernetes.io~1instance-type"));
            (
                node,
                vec![
                    text(node.pointer("/metadata/name")),
                    text(instance_type),
                    coerce(ColumnType::Cpu, node.pointer("/status/allocatable/cpu")),
                    coerce(ColumnType::Size, node.pointer("/status/allocatable/memory")),
                    coerce(ColumnType::Cpu, node.pointer("/status/capacity/cpu")),
                    coerce(ColumnType::Size, node.pointer("/status/capacity/memory")),
                ],
            )
        })
        .collect()
}

static TAINTS: BuiltinTable = BuiltinTable {
    name: "taints",
    resource: "nodes",
    columns: &[
        ("node_name", ColumnType::Text),
        ("key", ColumnType::Text),
        ("effect", ColumnType::Text),
    ],
    make_rows: taint_rows,
};

fn taint_rows(doc: &Value) -> Vec<(&Value, Vec<SqlValue>)> {
    let mut rows = Vec::new();
    for node in items(doc) {
        let node_name = text(node.pointer("/metadata/name"));
        for taint in node
            .pointer("/spec/taints")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            rows.push((
                taint,
                vec![
                    node_name.clone(),
                    text(taint.get("key")),
                    text(taint.get("effect")),
                ],
            ));
        }
    }
    rows
}

/// Container resource quantities summed across a container list.
/// Missing quantities count as zero, matching `kubectl describe` totals.
struct ResourceTotals {
    cpu: f64,
    gpu: f64,
    mem: i64,
}

impl ResourceTotals {
    fn columns(&self) -> [SqlValue; 3] {
        [
            SqlValue::Real(self.cpu),
            SqlValue::Real(self.gpu),
            SqlValue::Integer(self.mem),
        ]
    }
}

/// Sum the `requests` or `limits` quantities over `spec.containers` (or a
/// job template's containers).
fn sum_resources(containers: Option<&Value>, tag: &str) -> ResourceTotals {
    let mut totals = ResourceTotals {
        cpu: 0.0,
        gpu: 0.0,
        mem: 0,
    };
    for container in containers.and_then(Value::as_array).into_iter().flatten() {
        let Some(resources) = container.get("resources").and_then(|r| r.get(tag)) else {
            continue;
        };
        totals.cpu += float_quantity(resources.get("cpu"));
        totals.gpu += float_quantity(resources.get("nvidia.com/gpu"));
        totals.mem += size_quantity(resources.get("memory"));
    }
    totals
}

fn float_quantity(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::String(text)) => values::parse_cpu(text).unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn size_quantity(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::String(text)) => values::parse_size(text).unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}

fn items(doc: &Value) -> impl Iterator<Item = &Value> {
    doc.get("items").and_then(Value::as_array).into_iter().flatten()
}

fn text(value: Option<&Value>) -> SqlValue {
    coerce(ColumnType::Text, value)
}

fn date(value: Option<&Value>) -> SqlValue {
    coerce(ColumnType::Date, value)
}
