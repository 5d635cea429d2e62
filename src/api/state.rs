use crate::collective::Collective;
use crate::error::{CollectiveError, Result};
use crate::event::CollectiveKind;

/// Collectives served by this node's API
#[derive(Clone, Debug)]
pub struct ApiState {
    pub cluster: Collective,
    pub federation: Option<Collective>,
}

impl ApiState {
    pub fn new(cluster: Collective, federation: Option<Collective>) -> Self {
        Self {
            cluster,
            federation,
        }
    }

    pub fn collective(&self, kind: CollectiveKind) -> Result<&Collective> {
        match kind {
            CollectiveKind::Cluster => Ok(&self.cluster),
            CollectiveKind::Federation => self.federation.as_ref().ok_or_else(|| {
                CollectiveError::NotFound("no federation collective on this node".to_string())
            }),
        }
    }
}
