use self::kubeconfig::Kubeconfig;
use crate::{error::LifecycleError, net_utils};
use anyhow::{ensure, Context, Result};
use chrono::Datelike;
use der::{Decode, Encode};
use fn_error_context::context;
use itertools::Itertools;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rsa::{
    pkcs1::{EncodeRsaPrivateKey, LineEnding},
    pkcs8::EncodePublicKey,
    RsaPrivateKey,
};
use sha2::Digest;
use std::{
    io::Write,
    net::IpAddr,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;

pub(crate) mod kubeconfig;

pub(crate) const ADMIN_KUBECONFIG: &str = "admin.conf";
pub(crate) const CONTROLLER_MANAGER_KUBECONFIG: &str = "controller-manager.conf";
pub(crate) const SCHEDULER_KUBECONFIG: &str = "scheduler.conf";

/// Where a CertAuthority reads its CA from and writes its output to
#[derive(Clone, Debug)]
pub(crate) struct CertPaths {
    pub(crate) ca_dir: PathBuf,
    pub(crate) cert_dir: PathBuf,
    pub(crate) kubeconfig_dir: PathBuf,
}

impl CertPaths {
    /// CA, leaf certs and kubeconfigs all under one staging etc dir
    pub(crate) fn staged(etc_dir: &Path) -> Self {
        Self {
            ca_dir: etc_dir.join("pki"),
            cert_dir: etc_dir.join("pki"),
            kubeconfig_dir: etc_dir.to_path_buf(),
        }
    }

    /// Leaf certs for one host, signed by the staged CA
    pub(crate) fn for_host(etc_dir: &Path, host_dir: &Path) -> Self {
        Self {
            ca_dir: etc_dir.join("pki"),
            cert_dir: host_dir.join("pki"),
            kubeconfig_dir: host_dir.to_path_buf(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct AltNames {
    pub(crate) dns_names: Vec<String>,
    pub(crate) ips: Vec<IpAddr>,
}

impl AltNames {
    pub(crate) fn add(&mut self, name: &str) {
        match name.parse::<IpAddr>() {
            Ok(ip) if !self.ips.contains(&ip) => self.ips.push(ip),
            Ok(_) => {}
            Err(_) if name.is_empty() || self.dns_names.iter().any(|existing| existing == name) => {}
            Err(_) => self.dns_names.push(name.to_string()),
        }
    }

    pub(crate) fn to_sans(&self) -> Vec<String> {
        self.dns_names
            .iter()
            .cloned()
            .chain(self.ips.iter().map(IpAddr::to_string))
            .collect()
    }
}

/// Everything needed to derive the SANs of one control plane node
#[derive(Clone, Debug)]
pub(crate) struct CertRequest {
    pub(crate) cert_sans: Vec<String>,
    pub(crate) advertise_address: String,
    pub(crate) hostname: String,
    pub(crate) service_cidr: String,
    pub(crate) dns_domain: String,
    /// Server URL written into the generated kubeconfigs
    pub(crate) control_plane_endpoint: String,
}

impl CertRequest {
    pub(crate) fn api_server_alt_names(&self) -> Result<AltNames> {
        let mut alt_names = AltNames::default();

        for name in [
            self.hostname.clone(),
            "kubernetes".to_string(),
            "kubernetes.default".to_string(),
            "kubernetes.default.svc".to_string(),
            format!("kubernetes.default.svc.{}", self.dns_domain),
            self.advertise_address.clone(),
            net_utils::first_ip(&self.service_cidr)
                .context("computing the kubernetes service IP")?
                .to_string(),
        ] {
            alt_names.add(&name);
        }

        for san in &self.cert_sans {
            alt_names.add(san);
        }

        Ok(alt_names)
    }

    pub(crate) fn etcd_alt_names(&self) -> AltNames {
        let mut alt_names = AltNames::default();
        for name in [self.hostname.as_str(), "localhost", self.advertise_address.as_str(), "127.0.0.1", "::1"] {
            alt_names.add(name);
        }
        alt_names
    }
}

pub(crate) trait CertAuthority: Send + Sync {
    /// Cluster, front proxy and etcd CAs. Existing CAs are kept as they are.
    fn generate_ca(&self, paths: &CertPaths) -> Result<()>;

    /// API server serving cert plus the kubelet and front proxy client certs
    fn generate_api_server_certs(&self, paths: &CertPaths, alt_names: &AltNames) -> Result<()>;

    fn generate_etcd_certs(&self, paths: &CertPaths, alt_names: &AltNames) -> Result<()>;

    fn generate_service_account_key(&self, paths: &CertPaths) -> Result<()>;

    fn generate_kubeconfigs(&self, paths: &CertPaths, server: &str) -> Result<()>;
}

/// Serializes certificate generation so concurrent joins never write the staging dir at once
pub(crate) struct CertCoordinator {
    lock: Mutex<()>,
}

impl CertCoordinator {
    pub(crate) fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    /// The full bundle: CAs, API server, etcd, service account key and kubeconfigs
    pub(crate) async fn generate_certificates(&self, authority: &dyn CertAuthority, paths: &CertPaths, request: &CertRequest) -> Result<()> {
        let _guard = self.lock.lock().await;

        let generated = (|| -> Result<()> {
            authority.generate_ca(paths).context("CA")?;
            authority
                .generate_api_server_certs(paths, &request.api_server_alt_names()?)
                .context("API server certs")?;
            authority
                .generate_etcd_certs(paths, &request.etcd_alt_names())
                .context("etcd certs")?;
            authority.generate_service_account_key(paths).context("service account key")?;
            authority
                .generate_kubeconfigs(paths, &request.control_plane_endpoint)
                .context("kubeconfigs")?;
            Ok(())
        })();

        generated.map_err(|err| LifecycleError::CertGeneration(err).into())
    }

    /// Only the API server serving cert for one joining master
    pub(crate) async fn generate_local_cert(&self, authority: &dyn CertAuthority, paths: &CertPaths, request: &CertRequest) -> Result<()> {
        let _guard = self.lock.lock().await;

        request
            .api_server_alt_names()
            .and_then(|alt_names| authority.generate_api_server_certs(paths, &alt_names))
            .with_context(|| format!("API server cert for {}", request.advertise_address))
            .map_err(|err| LifecycleError::CertGeneration(err).into())
    }
}

/// `sha256:<hex>` of the SubjectPublicKeyInfo of every CA cert the kubeconfig trusts
#[context("computing CA cert pins from {}", kubeconfig_path.display())]
pub(crate) fn compute_ca_cert_pins(kubeconfig_path: &Path) -> Result<Vec<String>> {
    let kubeconfig = Kubeconfig::load(kubeconfig_path)?;
    let bundle = kubeconfig.ca_bundle(kubeconfig_path.parent().unwrap_or(Path::new(".")))?;

    let pins = pem::parse_many(bundle)
        .context("parsing CA bundle")?
        .iter()
        .filter(|pem| pem.tag() == "CERTIFICATE")
        .map(|pem| spki_pin(pem.contents()))
        .collect::<Result<Vec<_>>>()?;

    ensure!(!pins.is_empty(), "no CA certificates found");
    Ok(pins)
}

fn spki_pin(der_bytes: &[u8]) -> Result<String> {
    let certificate = x509_cert::Certificate::from_der(der_bytes).context("parsing CA certificate")?;
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .context("encoding SubjectPublicKeyInfo")?;

    Ok(format!("sha256:{}", hex::encode(sha2::Sha256::digest(spki))))
}

/// Issues certificates with rcgen, ECDSA P-256 keys for leaves and CAs, RSA for the service account
pub(crate) struct RcgenCertAuthority {
    ca_validity_years: i32,
    cert_validity_years: i32,
}

struct Issuer {
    certificate: Certificate,
    key: KeyPair,
    pem: String,
}

enum Usage {
    Server,
    Client,
    ServerAndClient,
}

impl RcgenCertAuthority {
    pub(crate) fn new(ca_validity_years: u32, cert_validity_years: u32) -> Self {
        Self {
            ca_validity_years: ca_validity_years as i32,
            cert_validity_years: cert_validity_years as i32,
        }
    }

    fn validity(&self, params: &mut CertificateParams, years: i32) {
        let now = chrono::Utc::now();
        // Day of month capped so the same date exists in every month
        let day = now.day().min(28) as u8;
        params.not_before = rcgen::date_time_ymd(now.year(), now.month() as u8, day);
        params.not_after = rcgen::date_time_ymd(now.year() + years, now.month() as u8, day);
    }

    fn load_or_create_ca(&self, dir: &Path, name: &str, common_name: &str) -> Result<Issuer> {
        let cert_path = dir.join(format!("{}.crt", name));
        let key_path = dir.join(format!("{}.key", name));

        if cert_path.exists() && key_path.exists() {
            let pem = std::fs::read_to_string(&cert_path).with_context(|| format!("reading {}", cert_path.display()))?;
            let key = KeyPair::from_pem(&std::fs::read_to_string(&key_path).with_context(|| format!("reading {}", key_path.display()))?)
                .with_context(|| format!("parsing {}", key_path.display()))?;
            // Re-signing the loaded params gives an issuer handle with the same subject and key
            let certificate = CertificateParams::from_ca_cert_pem(&pem)
                .with_context(|| format!("parsing {}", cert_path.display()))?
                .self_signed(&key)?;

            log::debug!("reusing existing CA {}", cert_path.display());
            return Ok(Issuer { certificate, key, pem });
        }

        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![common_name.to_string()])?;
        params.distinguished_name = distinguished_name(common_name, None);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::KeyCertSign,
        ];
        self.validity(&mut params, self.ca_validity_years);

        let certificate = params.self_signed(&key)?;
        let pem = certificate.pem();

        write_file(&cert_path, &pem, false)?;
        write_file(&key_path, &key.serialize_pem(), true)?;
        log::info!("generated CA {}", cert_path.display());

        Ok(Issuer { certificate, key, pem })
    }

    fn load_ca(&self, dir: &Path, name: &str) -> Result<Issuer> {
        let cert_path = dir.join(format!("{}.crt", name));
        ensure!(cert_path.exists(), "CA {} has not been generated", cert_path.display());
        self.load_or_create_ca(dir, name, name)
    }

    fn issue(
        &self,
        issuer: &Issuer,
        common_name: &str,
        organization: Option<&str>,
        usage: Usage,
        alt_names: &AltNames,
    ) -> Result<(String, KeyPair)> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(alt_names.to_sans())?;
        params.distinguished_name = distinguished_name(common_name, organization);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = match usage {
            Usage::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
            Usage::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
            Usage::ServerAndClient => vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth],
        };
        params.use_authority_key_identifier_extension = true;
        self.validity(&mut params, self.cert_validity_years);

        let certificate = params.signed_by(&key, &issuer.certificate, &issuer.key)?;
        Ok((certificate.pem(), key))
    }

    fn issue_to_files(
        &self,
        issuer: &Issuer,
        dir: &Path,
        name: &str,
        common_name: &str,
        organization: Option<&str>,
        usage: Usage,
        alt_names: &AltNames,
    ) -> Result<()> {
        let (cert_pem, key) = self
            .issue(issuer, common_name, organization, usage, alt_names)
            .with_context(|| format!("issuing {}", name))?;

        write_file(&dir.join(format!("{}.crt", name)), &cert_pem, false)?;
        write_file(&dir.join(format!("{}.key", name)), &key.serialize_pem(), true)?;
        Ok(())
    }
}

impl CertAuthority for RcgenCertAuthority {
    fn generate_ca(&self, paths: &CertPaths) -> Result<()> {
        self.load_or_create_ca(&paths.ca_dir, "ca", "kubernetes")?;
        self.load_or_create_ca(&paths.ca_dir, "front-proxy-ca", "front-proxy-ca")?;
        self.load_or_create_ca(&paths.ca_dir.join("etcd"), "ca", "etcd-ca")?;
        Ok(())
    }

    fn generate_api_server_certs(&self, paths: &CertPaths, alt_names: &AltNames) -> Result<()> {
        let ca = self.load_ca(&paths.ca_dir, "ca")?;
        let front_proxy_ca = self.load_ca(&paths.ca_dir, "front-proxy-ca")?;

        // A host dir needs the CA next to its leaves so it can be mirrored as a whole
        if paths.cert_dir != paths.ca_dir {
            write_file(&paths.cert_dir.join("ca.crt"), &ca.pem, false)?;
        }

        self.issue_to_files(&ca, &paths.cert_dir, "apiserver", "kube-apiserver", None, Usage::Server, alt_names)?;
        self.issue_to_files(
            &ca,
            &paths.cert_dir,
            "apiserver-kubelet-client",
            "kube-apiserver-kubelet-client",
            Some("system:masters"),
            Usage::Client,
            &AltNames::default(),
        )?;
        self.issue_to_files(
            &front_proxy_ca,
            &paths.cert_dir,
            "front-proxy-client",
            "front-proxy-client",
            None,
            Usage::Client,
            &AltNames::default(),
        )
    }

    fn generate_etcd_certs(&self, paths: &CertPaths, alt_names: &AltNames) -> Result<()> {
        let etcd_ca = self.load_ca(&paths.ca_dir.join("etcd"), "ca")?;
        let etcd_dir = paths.cert_dir.join("etcd");
        let first_dns_name = alt_names.dns_names.first().map(String::as_str).unwrap_or("localhost");

        self.issue_to_files(&etcd_ca, &etcd_dir, "server", first_dns_name, None, Usage::ServerAndClient, alt_names)?;
        self.issue_to_files(&etcd_ca, &etcd_dir, "peer", first_dns_name, None, Usage::ServerAndClient, alt_names)?;
        self.issue_to_files(
            &etcd_ca,
            &etcd_dir,
            "healthcheck-client",
            "kube-etcd-healthcheck-client",
            None,
            Usage::Client,
            &AltNames::default(),
        )?;
        self.issue_to_files(
            &etcd_ca,
            &paths.cert_dir,
            "apiserver-etcd-client",
            "kube-apiserver-etcd-client",
            None,
            Usage::Client,
            &AltNames::default(),
        )
    }

    fn generate_service_account_key(&self, paths: &CertPaths) -> Result<()> {
        let key_path = paths.cert_dir.join("sa.key");
        if key_path.exists() {
            return Ok(());
        }

        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).context("generating service account key")?;
        let private_pem = key.to_pkcs1_pem(LineEnding::LF).context("encoding service account key")?;
        let public_pem = key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .context("encoding service account public key")?;

        write_file(&key_path, private_pem.as_str(), true)?;
        write_file(&paths.cert_dir.join("sa.pub"), &public_pem, false)
    }

    fn generate_kubeconfigs(&self, paths: &CertPaths, server: &str) -> Result<()> {
        let ca = self.load_ca(&paths.ca_dir, "ca")?;

        for (file, user, organization) in [
            (ADMIN_KUBECONFIG, "kubernetes-admin", Some("system:masters")),
            (CONTROLLER_MANAGER_KUBECONFIG, "system:kube-controller-manager", None),
            (SCHEDULER_KUBECONFIG, "system:kube-scheduler", None),
        ] {
            let (cert_pem, key) = self
                .issue(&ca, user, organization, Usage::Client, &AltNames::default())
                .with_context(|| format!("issuing client cert for {}", file))?;
            let kubeconfig = Kubeconfig::new(server, &ca.pem, user, &cert_pem, &key.serialize_pem());

            write_file(
                &paths.kubeconfig_dir.join(file),
                &serde_yaml::to_string(&kubeconfig).context("serializing kubeconfig")?,
                true,
            )?;
        }

        Ok(())
    }
}

fn distinguished_name(common_name: &str, organization: Option<&str>) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    if let Some(organization) = organization {
        name.push(DnType::OrganizationName, organization);
    }
    name.push(DnType::CommonName, common_name);
    name
}

fn write_file(path: &Path, content: &str, private: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(if private { 0o600 } else { 0o644 })
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;

    file.write_all(content.as_bytes())
        .with_context(|| format!("writing {}", path.display()))
}

/// Relative paths of everything a joining master needs from the staged PKI dir
pub(crate) fn shared_pki_files(pki_dir: &Path) -> Result<Vec<PathBuf>> {
    let shared = [
        "ca.crt",
        "ca.key",
        "sa.key",
        "sa.pub",
        "front-proxy-ca.crt",
        "front-proxy-ca.key",
        "etcd/ca.crt",
        "etcd/ca.key",
    ];

    shared
        .iter()
        .map(|relative| {
            let path = pki_dir.join(relative);
            ensure!(path.exists(), "{} has not been generated", path.display());
            Ok(PathBuf::from(relative))
        })
        .collect::<Result<Vec<_>>>()
        .map(|files| files.into_iter().sorted().collect())
}
