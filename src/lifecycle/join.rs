use super::{
    context::{CriSettings, OperationContext, Topology},
    fanout, Lifecycle, JOIN_MASTER_CONFIG_FILE, JOIN_NODE_CONFIG_FILE, LVSCARE_DOMAIN, REMOTE_PKI_DIR,
    UPDATE_CONFIG_FILE,
};
use crate::{
    kubeadm::{DocumentKind, KubeadmConfig},
    pki::{self, CertPaths, CertRequest},
    remote::{self, Host},
    token,
    version::CommandKind,
};
use anyhow::{Context, Result};

impl Lifecycle<'_> {
    /// Join `joining` as control plane nodes. `topology` lists every master, the joining ones
    /// included, so the API server SANs cover all of them.
    pub(crate) async fn join_masters(&self, topology: &Topology, joining: &[Host]) -> Result<()> {
        if joining.is_empty() {
            return Ok(());
        }

        let master0 = topology.master0()?;
        let kube_version = &self.config.cluster.kubernetes_version;

        self.step("wait for ssh on joining masters", self.wait_ssh_ready(joining))
            .await?;

        let kubeadm = self
            .step("load kubeadm config", async {
                let mut kubeadm = self.load_kubeadm_config(kube_version)?;
                self.refresh_from_cluster(&mut kubeadm).await?;

                let cluster = &self.config.cluster;
                kubeadm.set_control_plane_endpoint(&self.apiserver_endpoint(kubeadm.api_server_port()));
                kubeadm.set_cert_sans(&cluster.apiserver_domain, &cluster.vip, &self.cert_san_hosts(topology));
                Ok(kubeadm)
            })
            .await?;

        let ctx = OperationContext::new(kube_version, kubeadm).with_certificate_key(&token::create_certificate_key());

        self.step("copy static files to joining masters", self.copy_static_files(joining))
            .await?;

        self.step(
            "send kubeconfigs to joining masters",
            fanout::fail_fast("send kubeconfigs to", joining, |host| self.copy_kubeconfigs(host)),
        )
        .await?;

        self.step(
            "send shared certificates to joining masters",
            fanout::fail_fast("send shared certificates to", joining, |host| self.send_shared_pki(host)),
        )
        .await?;

        let token = self
            .step(&format!("issue token on {}", master0), self.issue_token(&ctx, master0))
            .await?;
        let ctx = ctx.with_token(token);

        self.step(
            "generate join master configs",
            fanout::fail_fast("generate join master config for", joining, |host| {
                self.stage_join_master_config(&ctx, master0, host)
            }),
        )
        .await?;

        for host in joining {
            self.step(&format!("join master {}", host), self.join_master(&ctx, master0, host))
                .await?;
        }

        self.step(&format!("update cluster config on {}", master0), self.update_cluster(&ctx, master0))
            .await?;

        if !topology.nodes.is_empty() {
            self.sync_node_ipvs(topology, ctx.kubeadm().api_server_port()).await?;
        }

        Ok(())
    }

    /// Join `joining` as worker nodes behind the VIP
    pub(crate) async fn join_nodes(&self, topology: &Topology, joining: &[Host]) -> Result<()> {
        if joining.is_empty() {
            return Ok(());
        }

        let master0 = topology.master0()?;
        let kube_version = &self.config.cluster.kubernetes_version;

        self.step("wait for ssh on joining nodes", self.wait_ssh_ready(joining))
            .await?;

        let kubeadm = self
            .step("load kubeadm config", async { self.load_kubeadm_config(kube_version) })
            .await?;
        let ctx = OperationContext::new(kube_version, kubeadm);

        let token = self
            .step(&format!("issue token on {}", master0), self.issue_token(&ctx, master0))
            .await?;
        let ctx = ctx.with_token(token);

        self.step(
            "join nodes",
            fanout::fail_fast("join node", joining, |host| self.join_node(&ctx, topology, master0, host)),
        )
        .await?;

        Ok(())
    }

    /// Take the SANs and networking of the running cluster over the local defaults
    async fn refresh_from_cluster(&self, kubeadm: &mut KubeadmConfig) -> Result<()> {
        let live_text = self
            .kube_client
            .kubeadm_cluster_configuration()
            .await
            .context("reading the live ClusterConfiguration")?;

        if live_text.trim().is_empty() {
            log::warn!("kube-system/kubeadm-config has no ClusterConfiguration, using local defaults");
            return Ok(());
        }

        let live = KubeadmConfig::from_yaml(self.registry, &live_text).context("decoding the live ClusterConfiguration")?;

        if !live.cluster.api_server.cert_sans.is_empty() {
            kubeadm.cluster.api_server.cert_sans = live.cluster.api_server.cert_sans.clone();
        }

        let networking = &live.cluster.networking;
        if networking.pod_subnet.is_some() {
            kubeadm.cluster.networking.pod_subnet = networking.pod_subnet.clone();
        }
        if networking.service_subnet.is_some() {
            kubeadm.cluster.networking.service_subnet = networking.service_subnet.clone();
        }
        if networking.dns_domain.is_some() {
            kubeadm.cluster.networking.dns_domain = networking.dns_domain.clone();
        }

        Ok(())
    }

    async fn send_shared_pki(&self, host: &Host) -> Result<()> {
        let pki_dir = CertPaths::staged(&self.etc_dir).cert_dir;

        for relative in pki::shared_pki_files(&pki_dir)? {
            let remote_path = format!(
                "{}/{}",
                REMOTE_PKI_DIR,
                relative.to_str().with_context(|| format!("non-unicode path {}", relative.display()))?
            );
            self.executor.copy_file(host, &pki_dir.join(&relative), &remote_path).await?;
        }

        Ok(())
    }

    /// The join document of one master, derived from its own copy of the shared config
    pub(crate) fn join_master_config(&self, ctx: &OperationContext, master0: &Host, host: &Host, cri: &CriSettings) -> Result<KubeadmConfig> {
        let mut kubeadm = ctx.derive_config();
        let port = kubeadm.api_server_port();

        kubeadm.set_master_join(&host.ip, ctx.token()?, &format!("{}:{}", master0.ip, port));
        self.apply_cri(&mut kubeadm, cri);
        kubeadm.set_defaults();

        Ok(kubeadm)
    }

    async fn stage_join_master_config(&self, ctx: &OperationContext, master0: &Host, host: &Host) -> Result<()> {
        let cri = self.detect_cri(host).await?;
        let kubeadm = self.join_master_config(ctx, master0, host, &cri)?;
        let rendered = self.render(&kubeadm, &[DocumentKind::Join, DocumentKind::Kubelet])?;

        self.stage_and_copy(
            host,
            &self.host_dir(host).join(JOIN_MASTER_CONFIG_FILE),
            &rendered,
            &self.config.remote_etc_file(JOIN_MASTER_CONFIG_FILE),
        )
        .await
    }

    async fn join_master(&self, ctx: &OperationContext, master0: &Host, host: &Host) -> Result<()> {
        let domain = &self.config.cluster.apiserver_domain;
        let port = ctx.kubeadm().api_server_port();

        self.registry_auth(host).await?;

        self.generate_local_cert(ctx, host).await?;

        self.executor
            .run_sync(host, &remote::replace_hosts_entry_cmds(&master0.ip, domain))
            .await
            .context("pointing the API server domain at master0")?;

        let join_cmd = self.kubeadm_command(
            ctx,
            CommandKind::JoinMaster,
            &self.config.remote_etc_file(JOIN_MASTER_CONFIG_FILE),
            port,
            master0,
        )?;
        self.executor.run_sync(host, &[join_cmd]).await?;

        self.executor
            .run_sync(host, &remote::replace_hosts_entry_cmds(&host.ip, domain))
            .await
            .context("pointing the API server domain at the master itself")?;

        self.copy_admin_kubeconfig(host).await
    }

    /// The API server serving cert of one joining master, signed by the staged CA
    async fn generate_local_cert(&self, ctx: &OperationContext, host: &Host) -> Result<()> {
        let kubeadm = ctx.kubeadm();
        let host_dir = self.host_dir(host);

        let request = CertRequest {
            cert_sans: kubeadm.cluster.api_server.cert_sans.clone(),
            advertise_address: host.ip.clone(),
            hostname: self.node_name(host).await?,
            service_cidr: kubeadm.service_subnet().to_string(),
            dns_domain: kubeadm.dns_domain().to_string(),
            control_plane_endpoint: format!("https://{}", self.apiserver_endpoint(kubeadm.api_server_port())),
        };

        let paths = CertPaths::for_host(&self.etc_dir, &host_dir);
        self.certs
            .generate_local_cert(&*self.cert_authority, &paths, &request)
            .await?;

        for file in ["apiserver.crt", "apiserver.key"] {
            self.executor
                .copy_file(host, &paths.cert_dir.join(file), &format!("{}/{}", REMOTE_PKI_DIR, file))
                .await?;
        }

        Ok(())
    }

    /// Upload the cluster config with SANs covering every master
    async fn update_cluster(&self, ctx: &OperationContext, master0: &Host) -> Result<()> {
        let mut kubeadm = ctx.derive_config();
        kubeadm.set_advertise_address(&master0.ip);
        let port = kubeadm.api_server_port();

        let rendered = self.render(&kubeadm, &[DocumentKind::Init, DocumentKind::Cluster])?;
        let remote_config = self.config.remote_etc_file(UPDATE_CONFIG_FILE);

        self.stage_and_copy(master0, &self.etc_dir.join(UPDATE_CONFIG_FILE), &rendered, &remote_config)
            .await?;

        let update_cmd = self.kubeadm_command(ctx, CommandKind::UpdateCluster, &remote_config, port, master0)?;
        self.executor.run_sync(master0, &[update_cmd]).await
    }

    /// The join document of one worker node
    pub(crate) fn join_node_config(&self, ctx: &OperationContext, host: &Host, cri: &CriSettings) -> Result<KubeadmConfig> {
        let mut kubeadm = ctx.derive_config();
        let port = kubeadm.api_server_port();

        kubeadm.set_node_join(&host.ip, ctx.token()?, &self.vip_endpoint(port));
        self.apply_cri(&mut kubeadm, cri);
        kubeadm.set_defaults();

        Ok(kubeadm)
    }

    async fn join_node(&self, ctx: &OperationContext, topology: &Topology, master0: &Host, host: &Host) -> Result<()> {
        let cri = self.detect_cri(host).await?;
        let kubeadm = self.join_node_config(ctx, host, &cri)?;
        let port = kubeadm.api_server_port();

        let rendered = self.render(&kubeadm, &[DocumentKind::Kubelet, DocumentKind::Join])?;
        let remote_config = self.config.remote_etc_file(JOIN_NODE_CONFIG_FILE);
        self.stage_and_copy(host, &self.host_dir(host).join(JOIN_NODE_CONFIG_FILE), &rendered, &remote_config)
            .await?;

        let mut hosts_cmds = remote::replace_hosts_entry_cmds(&self.config.cluster.vip, &self.config.cluster.apiserver_domain);
        hosts_cmds.extend(remote::replace_hosts_entry_cmds(&host.ip, LVSCARE_DOMAIN));
        self.executor
            .run_sync(host, &hosts_cmds)
            .await
            .context("adding API server and lvscare hosts entries")?;

        self.registry_auth(host).await?;

        self.ipvs_bootstrap(host, &topology.masters, port).await?;

        let join_cmd = self.kubeadm_command(ctx, CommandKind::JoinNode, &remote_config, port, master0)?;
        self.executor.run_sync(host, &[join_cmd]).await
    }
}
