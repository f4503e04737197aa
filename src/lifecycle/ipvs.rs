use super::{context::Topology, fanout, Lifecycle, KUBERNETES_DIR};
use crate::{
    remote::{self, Host},
    template::{self, LvscareParams, LVSCARE_TEMPLATE},
};
use anyhow::{Context, Result};

const LVSCARE_MANIFEST: &str = "manifests/kube-lvscare.yaml";

impl Lifecycle<'_> {
    /// Point every worker node's virtual server at the current master list
    pub(crate) async fn sync_node_ipvs(&self, topology: &Topology, port: u16) -> Result<()> {
        self.step(
            "sync ipvs on nodes",
            fanout::fail_fast("sync ipvs on", &topology.nodes, |node| {
                self.ipvs_bootstrap(node, &topology.masters, port)
            }),
        )
        .await?;

        Ok(())
    }

    /// Install the lvscare static pod on `node` and create the rules right away, before kubelet
    /// gets around to starting the pod
    pub(crate) async fn ipvs_bootstrap(&self, node: &Host, masters: &[Host], port: u16) -> Result<()> {
        let vip_endpoint = self.vip_endpoint(port);
        let real_servers = masters
            .iter()
            .map(|master| format!("{}:{}", master.ip, port))
            .collect::<Vec<_>>();

        let manifest = template::render(
            LVSCARE_TEMPLATE,
            LvscareParams {
                image: self.config.lvscare_image.clone(),
                vip_endpoint: vip_endpoint.clone(),
                real_servers: real_servers.clone(),
            },
        )
        .context("rendering the lvscare manifest")?;

        let manifest_path = format!("{}/{}", KUBERNETES_DIR, LVSCARE_MANIFEST);

        self.executor
            .run_sync(
                node,
                &[
                    remote::mkdir_cmd(&format!("{}/manifests", KUBERNETES_DIR)),
                    remote::write_file_cmd(&manifest_path, &manifest),
                    lvscare_run_once_cmd(&vip_endpoint, &real_servers),
                ],
            )
            .await
            .with_context(|| format!("bootstrapping ipvs rules on {}", node))
    }
}

fn lvscare_run_once_cmd(vip_endpoint: &str, real_servers: &[String]) -> String {
    let mut cmd = format!(
        "lvscare care --run-once --vs {} --health-path /healthz --health-schem https",
        vip_endpoint
    );
    for real_server in real_servers {
        cmd.push_str(" --rs ");
        cmd.push_str(real_server);
    }
    cmd
}
