//! Finding the connectors to drive.

use crate::device::KmsDevice;
use crate::modeset::{CardResources, ConnectionState, ConnectorState, ConnectorType};

/// A connector that answered its state query, with its position in
/// [`CardResources::connector_ids`].
#[derive(Debug, Clone)]
pub struct FoundConnector {
    pub index: usize,
    pub state: ConnectorState,
}

impl FoundConnector {
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state.connection_state == ConnectionState::Connected
    }
}

/// The first connected connector of type `ty`, skipping the one at index
/// `exclude` so a second display can be found independently of the first.
pub fn find_connector<D: KmsDevice + ?Sized>(
    dev: &D,
    resources: &CardResources,
    ty: ConnectorType,
    exclude: Option<usize>,
) -> Option<FoundConnector> {
    resources
        .connector_ids
        .iter()
        .enumerate()
        .filter(|(index, _)| Some(*index) != exclude)
        .find_map(|(index, id)| {
            let state = match dev.connector_state(*id) {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!("failed to query connector {id:?}: {err}");
                    return None;
                }
            };
            let found = FoundConnector { index, state };
            (found.state.connector_type == ty && found.is_connected()).then_some(found)
        })
}

/// Every connector that answers its state query, in enumeration order.
///
/// Some adapters misreport their connection state, so this is what the
/// composer falls back to when no connector of the configured type shows
/// up as connected.
pub fn queryable_connectors<D: KmsDevice + ?Sized>(
    dev: &D,
    resources: &CardResources,
) -> Vec<FoundConnector> {
    resources
        .connector_ids
        .iter()
        .enumerate()
        .filter_map(|(index, id)| match dev.connector_state(*id) {
            Ok(state) => Some(FoundConnector { index, state }),
            Err(err) => {
                tracing::warn!("failed to query connector {id:?}: {err}");
                None
            }
        })
        .collect()
}
