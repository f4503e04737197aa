use self::patch::Patch;
use crate::kubeadm::{conversion, DocumentKind, KubeadmConfig};
use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value};

pub(crate) mod patch;

const INIT_TEMPLATE: &str = include_str!("template/defaults/init.yaml");
const CLUSTER_TEMPLATE: &str = include_str!("template/defaults/cluster.yaml");
const JOIN_TEMPLATE: &str = include_str!("template/defaults/join.yaml");
const KUBELET_TEMPLATE: &str = include_str!("template/defaults/kubelet.yaml");
const KUBE_PROXY_TEMPLATE: &str = include_str!("template/defaults/kube-proxy.yaml");
pub(crate) const LVSCARE_TEMPLATE: &str = include_str!("template/defaults/lvscare.yaml");

/// Values available to the built-in document skeletons
#[derive(Clone, Debug, Serialize)]
pub(crate) struct TemplateParams {
    pub(crate) kubernetes_version: String,
    pub(crate) pod_subnet: String,
    pub(crate) service_subnet: String,
    pub(crate) dns_domain: String,
    pub(crate) apiserver_domain: String,
    pub(crate) apiserver_port: u16,
    pub(crate) vip: String,
    pub(crate) etcd_data_dir: String,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct LvscareParams {
    pub(crate) image: String,
    pub(crate) vip_endpoint: String,
    pub(crate) real_servers: Vec<String>,
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_trim_blocks(true);
    env.set_keep_trailing_newline(true);
    env
}

/// Substitute `params` into one template. Referencing a missing parameter is an error.
pub(crate) fn render<S: Serialize>(template_text: &str, params: S) -> Result<String> {
    environment().render_str(template_text, params).context("rendering template")
}

pub(crate) fn render_default(kind: DocumentKind, params: &TemplateParams) -> Result<String> {
    let text = match kind {
        DocumentKind::Init => INIT_TEMPLATE,
        DocumentKind::Cluster => CLUSTER_TEMPLATE,
        DocumentKind::Join => JOIN_TEMPLATE,
        DocumentKind::Kubelet => KUBELET_TEMPLATE,
        DocumentKind::KubeProxy => KUBE_PROXY_TEMPLATE,
    };

    render(text, params).with_context(|| format!("rendering default {}", kind))
}

/// Render one document at the config's API version, then apply the patches aimed at it
pub(crate) fn render_document(config: &KubeadmConfig, kind: DocumentKind, patches: &[Patch]) -> Result<String> {
    let gvk = kind.gvk(config.api_version);

    let mut body = config.document_value(kind)?;
    if kind.fixed_version().is_none() {
        conversion::downgrade(kind, config.api_version, &mut body)?;
    }

    let mut document = Map::new();
    document.insert("apiVersion".to_string(), Value::String(gvk.api_version()));
    document.insert("kind".to_string(), Value::String(gvk.kind.to_string()));
    if let Value::Object(fields) = body {
        document.extend(fields);
    }

    let yaml = serde_yaml::to_string(&Value::Object(document)).with_context(|| format!("serializing {}", kind))?;

    patch::apply_patches(&yaml, patches, &gvk)
}

/// Render several documents into one multi-document stream, in the given order
pub(crate) fn render_documents(config: &KubeadmConfig, kinds: &[DocumentKind], patches: &[Patch]) -> Result<String> {
    Ok(kinds
        .iter()
        .map(|kind| render_document(config, *kind, patches))
        .collect::<Result<Vec<_>>>()?
        .join("---\n"))
}
