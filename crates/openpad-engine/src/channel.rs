//! Per-link L2CAP channel bookkeeping.

use openpad_hid_sixaxis_protocol::l2cap::Psm;

/// First dynamically allocated channel id, and the value the allocator
/// resets to after wrapping.
const FIRST_CID: u16 = 0x0040;

/// One of the three channel pairs of a controller link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEndpoint {
    pub psm: Psm,
    /// Channel id on the controller side — the target of outbound frames.
    pub remote_cid: [u8; 2],
    /// Channel id we allocated on our side.
    pub local_cid: [u8; 2],
}

/// The three L2CAP channels of one physical link plus the handshake flags
/// that sequence Service-channel startup.
///
/// Invariants: `service_started` only while the Service endpoint exists;
/// `can_start_hid` is raised once the Service channel has configured and the
/// initialization exchange finished, and it is what gates the hand-off into
/// the gameplay phase.
#[derive(Debug, Default)]
pub struct ChannelTable {
    command: Option<ChannelEndpoint>,
    interrupt: Option<ChannelEndpoint>,
    service: Option<ChannelEndpoint>,
    next_cid: u16,
    pub can_start_hid: bool,
    pub can_start_service: bool,
    pub service_started: bool,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self {
            next_cid: FIRST_CID,
            ..Self::default()
        }
    }

    /// Hand out the next local channel id. Ids increase monotonically and
    /// never repeat until the counter would reach 0xFFFF, at which point it
    /// resets to 0x40.
    pub fn allocate_cid(&mut self) -> u16 {
        let cid = self.next_cid;
        let next = cid.wrapping_add(1);
        self.next_cid = if next < 0xFFFF { next } else { FIRST_CID };
        cid
    }

    fn slot_mut(&mut self, psm: Psm) -> &mut Option<ChannelEndpoint> {
        match psm {
            Psm::Command => &mut self.command,
            Psm::Interrupt => &mut self.interrupt,
            Psm::Service => &mut self.service,
        }
    }

    fn slot(&self, psm: Psm) -> Option<&ChannelEndpoint> {
        match psm {
            Psm::Command => self.command.as_ref(),
            Psm::Interrupt => self.interrupt.as_ref(),
            Psm::Service => self.service.as_ref(),
        }
    }

    /// Record an inbound connection request: remember the peer's channel id
    /// and allocate ours. Configuring the Interrupt channel is what makes
    /// opening the Service channel legal.
    pub fn set_inbound(&mut self, psm: Psm, remote_cid: [u8; 2]) -> [u8; 2] {
        let local = self.allocate_cid().to_le_bytes();
        *self.slot_mut(psm) = Some(ChannelEndpoint {
            psm,
            remote_cid,
            local_cid: local,
        });
        if psm == Psm::Interrupt {
            self.can_start_service = true;
        }
        local
    }

    /// Record the Service channel ids returned by the controller for the
    /// connection we initiated.
    pub fn set_service(&mut self, remote_cid: [u8; 2], local_cid: [u8; 2]) {
        self.service = Some(ChannelEndpoint {
            psm: Psm::Service,
            remote_cid,
            local_cid,
        });
        self.service_started = true;
        self.can_start_service = false;
    }

    /// Outbound target id for `psm`.
    pub fn remote_cid(&self, psm: Psm) -> Option<[u8; 2]> {
        self.slot(psm).map(|e| e.remote_cid)
    }

    /// Our id for `psm`.
    pub fn local_cid(&self, psm: Psm) -> Option<[u8; 2]> {
        self.slot(psm).map(|e| e.local_cid)
    }

    /// Find the remote id paired with one of our local ids (configuration
    /// request dispatch).
    pub fn remote_for_local(&self, local: [u8; 2]) -> Option<[u8; 2]> {
        [&self.command, &self.interrupt, &self.service]
            .into_iter()
            .flatten()
            .find(|e| e.local_cid == local)
            .map(|e| e.remote_cid)
    }
}
