// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

use nostr_sdk::PublicKey;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    Online,
    Offline,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub pubkey: PublicKey,
    pub status: PeerStatus,
}

impl PeerInfo {
    pub fn new(pubkey: PublicKey) -> Self {
        Self {
            pubkey,
            status: PeerStatus::Unknown,
        }
    }

    pub fn online(pubkey: PublicKey) -> Self {
        Self {
            pubkey,
            status: PeerStatus::Online,
        }
    }

    pub fn with_status(mut self, status: PeerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_online(&self) -> bool {
        self.status == PeerStatus::Online
    }
}

/// Round-robin selection of ping targets.
///
/// Online peers are preferred; when none is online the whole peer list is
/// used. The cursor advances on every selection whichever pool was chosen,
/// so a flapping peer set still rotates.
#[derive(Debug, Default)]
pub struct PeerCursor {
    position: usize,
}

impl PeerCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn next_target(
        &mut self,
        peers: &[PeerInfo],
        self_pubkey: Option<&PublicKey>,
    ) -> Option<PublicKey> {
        let candidates: Vec<&PeerInfo> = peers
            .iter()
            .filter(|p| self_pubkey != Some(&p.pubkey))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let online: Vec<&PeerInfo> = candidates
            .iter()
            .copied()
            .filter(|p| p.is_online())
            .collect();
        let pool = if online.is_empty() { &candidates } else { &online };

        let target = pool[self.position % pool.len()].pubkey;
        self.position = self.position.wrapping_add(1);
        Some(target)
    }
}
