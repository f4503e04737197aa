use super::{types::ControlPlaneComponent, KubeadmConfig};
use crate::version::{self, V1_19_0};
use itertools::Itertools;
use std::collections::BTreeMap;

const FEATURE_GATES_ARG: &str = "feature-gates";
const SIGNING_DURATION_ARG: &str = "cluster-signing-duration";
const EXPERIMENTAL_SIGNING_DURATION_ARG: &str = "experimental-cluster-signing-duration";
const EXPERIMENTAL_SIGNING_DURATION: &str = "87600h";

enum Availability {
    Since(&'static str),
    Until(&'static str),
}

const GATES: &[(&str, Availability)] = &[
    ("CSIStorageCapacity", Availability::Since("v1.21.0")),
    ("TTLAfterFinished", Availability::Until("v1.24.0")),
    ("EphemeralContainers", Availability::Until("v1.26.0")),
];

fn gate_supported(gate: &str, kube_version: &str) -> bool {
    match GATES.iter().find(|(name, _)| *name == gate) {
        Some((_, Availability::Since(since))) => version::compare(kube_version, since),
        Some((_, Availability::Until(until))) => !version::compare(kube_version, until),
        None => true,
    }
}

/// Drop gates the target version refuses from a `A=true,B=false` flag value
pub(crate) fn prune_gate_flag(flag: &str, kube_version: &str) -> String {
    flag.split(',')
        .map(str::trim)
        .filter(|gate| !gate.is_empty())
        .filter(|gate| gate_supported(gate.split('=').next().unwrap_or_default().trim(), kube_version))
        .join(",")
}

pub(crate) fn prune_gate_map(gates: &mut BTreeMap<String, bool>, kube_version: &str) {
    gates.retain(|gate, _| gate_supported(gate, kube_version));
}

fn prune_component(component: &mut ControlPlaneComponent, kube_version: &str) {
    if let Some(flag) = component.extra_args.get(FEATURE_GATES_ARG) {
        let pruned = prune_gate_flag(flag, kube_version);
        if pruned.is_empty() {
            component.extra_args.remove(FEATURE_GATES_ARG);
        } else {
            component.extra_args.insert(FEATURE_GATES_ARG.to_string(), pruned);
        }
    }
}

/// Make the control plane and kubelet flags acceptable to `kube_version`
pub(crate) fn apply(config: &mut KubeadmConfig, kube_version: &str) {
    prune_component(&mut config.cluster.api_server.component, kube_version);
    prune_component(&mut config.cluster.controller_manager, kube_version);
    prune_component(&mut config.cluster.scheduler, kube_version);
    prune_gate_map(&mut config.kubelet.feature_gates, kube_version);

    if !version::compare(kube_version, V1_19_0) {
        let args = &mut config.cluster.controller_manager.extra_args;
        if args.remove(SIGNING_DURATION_ARG).is_some() {
            args.insert(
                EXPERIMENTAL_SIGNING_DURATION_ARG.to_string(),
                EXPERIMENTAL_SIGNING_DURATION.to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_gate_flag() {
        let flag = "TTLAfterFinished=true,EphemeralContainers=true,CSIStorageCapacity=true";

        assert_eq!(prune_gate_flag(flag, "v1.20.4"), "TTLAfterFinished=true,EphemeralContainers=true");
        assert_eq!(
            prune_gate_flag(flag, "v1.23.0"),
            "TTLAfterFinished=true,EphemeralContainers=true,CSIStorageCapacity=true"
        );
        assert_eq!(prune_gate_flag(flag, "v1.25.3"), "EphemeralContainers=true,CSIStorageCapacity=true");
        assert_eq!(prune_gate_flag(flag, "v1.27.1"), "CSIStorageCapacity=true");
        assert_eq!(prune_gate_flag("TTLAfterFinished=true", "v1.28.0"), "");
    }

    #[test]
    fn test_apply() {
        let mut config = KubeadmConfig::default();
        config
            .cluster
            .api_server
            .component
            .extra_args
            .insert("feature-gates".to_string(), "TTLAfterFinished=true".to_string());
        config
            .cluster
            .controller_manager
            .extra_args
            .insert("cluster-signing-duration".to_string(), "876000h".to_string());
        config.kubelet.feature_gates.insert("EphemeralContainers".to_string(), true);
        config.kubelet.feature_gates.insert("RotateKubeletServerCertificate".to_string(), true);

        let mut modern = config.clone();
        apply(&mut modern, "v1.26.0");
        assert!(!modern.cluster.api_server.component.extra_args.contains_key("feature-gates"));
        assert_eq!(modern.cluster.controller_manager.extra_args["cluster-signing-duration"], "876000h");
        assert_eq!(modern.kubelet.feature_gates.keys().collect::<Vec<_>>(), vec!["RotateKubeletServerCertificate"]);

        let mut legacy = config;
        apply(&mut legacy, "v1.18.6");
        assert_eq!(legacy.cluster.api_server.component.extra_args["feature-gates"], "TTLAfterFinished=true");
        assert!(!legacy.cluster.controller_manager.extra_args.contains_key("cluster-signing-duration"));
        assert_eq!(
            legacy.cluster.controller_manager.extra_args["experimental-cluster-signing-duration"],
            "87600h"
        );
        assert_eq!(legacy.kubelet.feature_gates.len(), 2);
    }
}
