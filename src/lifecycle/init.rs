use super::{
    context::{OperationContext, Topology},
    Lifecycle, INIT_CONFIG_FILE, REMOTE_PKI_DIR,
};
use crate::{
    kubeadm::{DocumentKind, KubeadmConfig},
    pki::{CertPaths, CertRequest},
    remote::{self, Host},
    token,
    version::{self, CommandKind},
};
use anyhow::{Context, Result};

const INIT_DOCUMENTS: [DocumentKind; 4] = [
    DocumentKind::Init,
    DocumentKind::Cluster,
    DocumentKind::Kubelet,
    DocumentKind::KubeProxy,
];

impl Lifecycle<'_> {
    /// Bring up master0. Joining the other hosts is up to the caller.
    pub(crate) async fn init(&self, topology: &Topology) -> Result<()> {
        let master0 = topology.master0()?;
        let kube_version = &self.config.cluster.kubernetes_version;

        let api_version = self
            .step("resolve kubeadm API version", async { version::resolve_api_version(kube_version) })
            .await?;
        log::info!("kubernetes {} uses kubeadm API {}", kube_version, api_version);

        let kubeadm = self
            .step("load kubeadm config", async { self.load_kubeadm_config(kube_version) })
            .await?;

        let cri = self
            .step(&format!("detect CRI on {}", master0), self.detect_cri(master0))
            .await?;

        let ctx = OperationContext::new(kube_version, kubeadm)
            .with_certificate_key(&token::create_certificate_key())
            .with_cri(cri);

        let ctx = ctx.with_kubeadm(
            self.step("generate init config", async { self.init_config(&ctx, topology, master0) })
                .await?,
        );

        let remote_config = self.config.remote_etc_file(INIT_CONFIG_FILE);
        self.step(&format!("copy init config to {}", master0), async {
            let rendered = self.render(ctx.kubeadm(), &INIT_DOCUMENTS)?;
            self.stage_and_copy(master0, &self.etc_dir.join(INIT_CONFIG_FILE), &rendered, &remote_config)
                .await
        })
        .await?;

        self.step(&format!("generate certificates for {}", master0), self.generate_certificates(&ctx, master0))
            .await?;

        self.step("copy static files to masters", self.copy_static_files(&topology.masters))
            .await?;

        self.step(&format!("init {}", master0), async {
            self.registry_auth(master0).await?;

            let port = ctx.kubeadm().api_server_port();
            let mut cmds = remote::replace_hosts_entry_cmds(&master0.ip, &self.config.cluster.apiserver_domain);
            cmds.push(self.kubeadm_command(&ctx, CommandKind::InitMaster, &remote_config, port, master0)?);

            self.executor.run_sync(master0, &cmds).await
        })
        .await?;

        self.step(&format!("copy admin kubeconfig on {}", master0), self.copy_admin_kubeconfig(master0))
            .await?;

        Ok(())
    }

    /// master0's copy of the config: advertise address, endpoints, SANs, CRI and certificate key
    pub(crate) fn init_config(&self, ctx: &OperationContext, topology: &Topology, master0: &Host) -> Result<KubeadmConfig> {
        let cluster = &self.config.cluster;
        let mut kubeadm = ctx.derive_config();

        kubeadm.set_advertise_address(&master0.ip);
        kubeadm.set_control_plane_endpoint(&self.apiserver_endpoint(kubeadm.api_server_port()));
        kubeadm.add_exclude_cidr(&format!("{}/32", cluster.vip));
        kubeadm.set_cert_sans(&cluster.apiserver_domain, &cluster.vip, &self.cert_san_hosts(topology));

        if topology.host_count() == 1 {
            kubeadm.set_single_host_taints();
        }

        let cri = ctx.cri.as_ref().context("CRI has not been detected")?;
        self.apply_cri(&mut kubeadm, cri);

        if let Some(certificate_key) = &ctx.certificate_key {
            kubeadm.set_certificate_key(certificate_key);
        }

        kubeadm.set_defaults();
        Ok(kubeadm)
    }

    /// The full PKI bundle into the staging dir, then onto master0
    async fn generate_certificates(&self, ctx: &OperationContext, master0: &Host) -> Result<()> {
        let kubeadm = ctx.kubeadm();

        let request = CertRequest {
            cert_sans: kubeadm.cluster.api_server.cert_sans.clone(),
            advertise_address: master0.ip.clone(),
            hostname: self.node_name(master0).await?,
            service_cidr: kubeadm.service_subnet().to_string(),
            dns_domain: kubeadm.dns_domain().to_string(),
            control_plane_endpoint: format!("https://{}", self.apiserver_endpoint(kubeadm.api_server_port())),
        };

        let paths = CertPaths::staged(&self.etc_dir);
        self.certs
            .generate_certificates(&*self.cert_authority, &paths, &request)
            .await?;

        remote::copy_dir(&*self.executor, master0, &paths.cert_dir, REMOTE_PKI_DIR, |_| true)
            .await
            .context("copying PKI")?;

        self.copy_kubeconfigs(master0).await.context("copying kubeconfigs")
    }
}
