//! CLI for this application
//!
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Authenticator, NoAuth, SharedSecretAuth};
use crate::clock::SystemClock;
use crate::config_error;
use crate::error::Result;
use crate::member::HostedMember;
use crate::settings::{self, CollectiveSettings};

#[derive(Clone, Debug, clap::Parser)]
#[command(name = settings::APP_NAME, version = settings::APP_VERSION)]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("COLLECTIVE_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("COLLECTIVE_HTTP_LISTEN_PORT"),
        help = "Port to bind the HTTP API server to"
    )]
    pub listen_port: u16,

    // Address peers use to reach us
    #[clap(
        long,
        env("COLLECTIVE_ADVERTISE_ADDRESS"),
        help = "Base URL peers use to reach this node (e.g., http://node1:8410)"
    )]
    pub advertise_address: String,

    #[clap(long, env("COLLECTIVE_DOMAIN"), help = "Cluster gossip domain name")]
    pub domain: String,

    // Members hosted by this process, `id` or `id:name`
    #[clap(
        long,
        env("COLLECTIVE_MEMBERS"),
        value_delimiter = ',',
        help = "Hosted members as id or id:name (e.g., node-a:Node A)"
    )]
    pub members: Vec<HostedMember>,

    #[clap(
        long,
        env("COLLECTIVE_SEEDS"),
        value_delimiter = ',',
        help = "Cluster seed addresses, tried in order"
    )]
    pub seeds: Vec<String>,

    #[clap(
        long,
        env("COLLECTIVE_SERVICES"),
        value_delimiter = ',',
        help = "Service names advertised by hosted members"
    )]
    pub services: Vec<String>,

    // Gossip tuning
    #[clap(
        long,
        default_value = settings::DEFAULT_FANOUT,
        env("COLLECTIVE_FANOUT"),
        help = "Peers each event is relayed to per hop"
    )]
    pub fanout: usize,

    #[clap(
        long,
        default_value = settings::DEFAULT_CYCLE,
        env("COLLECTIVE_CYCLE"),
        help = "Hop budget of events originated here"
    )]
    pub cycle: u32,

    #[clap(
        long,
        default_value = settings::DEFAULT_RENEWAL_INTERVAL_MS,
        env("COLLECTIVE_RENEWAL_INTERVAL_MS"),
        help = "Milliseconds between re-announces (plus cycle x event interval)"
    )]
    pub renewal_interval_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_EVENT_INTERVAL_MS,
        env("COLLECTIVE_EVENT_INTERVAL_MS"),
        help = "Milliseconds a relay batch builds up before it is sent"
    )]
    pub event_interval_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_SYNC_INTERVAL_MS,
        env("COLLECTIVE_SYNC_INTERVAL_MS"),
        help = "Milliseconds between anti-entropy pulls"
    )]
    pub sync_interval_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_SEED_REFRESH_INTERVAL_MS,
        env("COLLECTIVE_SEED_REFRESH_INTERVAL_MS"),
        help = "Milliseconds between bootstrap attempts"
    )]
    pub seed_refresh_interval_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_DEAD_PEER_CEILING_MS,
        env("COLLECTIVE_DEAD_PEER_CEILING_MS"),
        help = "Longest backoff before a failing peer is retried"
    )]
    pub dead_peer_ceiling_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_BACKOFF_INTERVAL_MS,
        env("COLLECTIVE_BACKOFF_INTERVAL_MS"),
        help = "Backoff per consecutive peer failure"
    )]
    pub backoff_interval_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_LEASE_PADDING_MS,
        env("COLLECTIVE_LEASE_PADDING_MS"),
        help = "Extra lease time on top of the renewal period"
    )]
    pub lease_padding_ms: u64,

    // Federation: only started when a domain is given
    #[clap(
        long,
        env("COLLECTIVE_FEDERATION_DOMAIN"),
        help = "Federation gossip domain; enables the federation collective"
    )]
    pub federation_domain: Option<String>,

    #[clap(
        long,
        env("COLLECTIVE_FEDERATION_SEEDS"),
        value_delimiter = ',',
        help = "Federation seed addresses, tried in order"
    )]
    pub federation_seeds: Vec<String>,

    #[clap(
        long,
        env("COLLECTIVE_FEDERATION_MEMBERS"),
        value_delimiter = ',',
        help = "Members hosted in the federation (defaults to --members)"
    )]
    pub federation_members: Vec<HostedMember>,

    // Peer authentication
    #[clap(
        long,
        env("COLLECTIVE_SHARED_SECRET"),
        hide_env_values = true,
        help = "Secret shared by all nodes to sign peer calls"
    )]
    pub shared_secret: Option<String>,

    #[clap(
        long,
        default_value = "30000",
        env("COLLECTIVE_CREDENTIAL_VALIDITY_MS"),
        help = "Lifetime of a signed peer credential"
    )]
    pub credential_validity_ms: u64,
}

impl Cli {
    pub fn socket_address(&self) -> Result<SocketAddr> {
        let listen_address: IpAddr = self
            .listen_address
            .parse()
            .map_err(|_| config_error!("invalid listen address '{}'", self.listen_address))?;
        Ok(SocketAddr::from((listen_address, self.listen_port)))
    }

    pub fn authenticator(&self) -> Result<Arc<dyn Authenticator>> {
        match &self.shared_secret {
            Some(secret) => Ok(Arc::new(SharedSecretAuth::new(
                secret,
                Duration::from_millis(self.credential_validity_ms),
                Arc::new(SystemClock),
            )?)),
            None => Ok(Arc::new(NoAuth)),
        }
    }

    fn apply_tuning(&self, mut conf: CollectiveSettings) -> CollectiveSettings {
        conf.fanout = self.fanout;
        conf.cycle = self.cycle;
        conf.renewal_interval = Duration::from_millis(self.renewal_interval_ms);
        conf.event_interval = Duration::from_millis(self.event_interval_ms);
        conf.sync_interval = Duration::from_millis(self.sync_interval_ms);
        conf.seed_refresh_interval = Duration::from_millis(self.seed_refresh_interval_ms);
        conf.dead_peer_ceiling = Duration::from_millis(self.dead_peer_ceiling_ms);
        conf.backoff_interval = Duration::from_millis(self.backoff_interval_ms);
        conf.lease_padding = Duration::from_millis(self.lease_padding_ms);
        conf.services = self.services.iter().cloned().collect::<BTreeSet<String>>();
        conf
    }

    /// Validated settings for the cluster and, if configured, the federation
    pub fn into_settings(self) -> Result<(CollectiveSettings, Option<CollectiveSettings>)> {
        let mut cluster = self.apply_tuning(CollectiveSettings::cluster(
            self.domain.clone(),
            self.advertise_address.clone(),
        ));
        cluster.members = self.members.clone();
        cluster.seeds = self.seeds.clone();
        cluster.validate()?;

        let federation = match &self.federation_domain {
            Some(domain) => {
                let mut federation = self.apply_tuning(CollectiveSettings::federation(
                    domain.clone(),
                    self.advertise_address.clone(),
                ));
                federation.members = if self.federation_members.is_empty() {
                    self.members.clone()
                } else {
                    self.federation_members.clone()
                };
                federation.seeds = self.federation_seeds.clone();
                federation.validate()?;
                Some(federation)
            }
            None => None,
        };
        Ok((cluster, federation))
    }
}
