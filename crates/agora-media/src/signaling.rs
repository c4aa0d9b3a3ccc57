//! Per-peer signaling decisions.
//!
//! Everything here is pure: the voice session feeds in the link's current
//! state and an incoming signal and gets back what to do. Out-of-order and
//! duplicate signals map to an `Ignore*` action instead of an error.

use agora_shared::UserPub;

use crate::peer::SignalingState;

/// Lifecycle of one link, as shown in the peer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Idle,
    OfferSent,
    OfferReceived,
    AnswerExchanged,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    Offer,
    Answer,
    Candidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingAction {
    /// Apply the offer and reply with an answer.
    AcceptOffer,
    /// Our own offer collided with theirs and we yield: roll back, then
    /// accept.
    RollbackAndAccept,
    /// Our own offer collided with theirs and we keep ours.
    IgnoreOffer,
    ApplyAnswer,
    /// No local offer is pending.
    IgnoreAnswer,
    AddCandidate,
    /// No remote description yet; hold the candidate until there is one.
    BufferCandidate,
}

/// Decide how to handle an incoming signal.
///
/// `has_remote_description` is whether a remote description has been
/// applied on this link. On an offer collision the smaller pub keeps its
/// offer.
pub fn decide(
    incoming: Incoming,
    state: SignalingState,
    has_remote_description: bool,
    local: &UserPub,
    remote: &UserPub,
) -> SignalingAction {
    match incoming {
        Incoming::Offer => match state {
            SignalingState::HaveLocalOffer if local < remote => SignalingAction::IgnoreOffer,
            SignalingState::HaveLocalOffer => SignalingAction::RollbackAndAccept,
            SignalingState::Closed => SignalingAction::IgnoreOffer,
            SignalingState::Stable | SignalingState::HaveRemoteOffer => {
                SignalingAction::AcceptOffer
            }
        },
        Incoming::Answer => match state {
            SignalingState::HaveLocalOffer => SignalingAction::ApplyAnswer,
            _ => SignalingAction::IgnoreAnswer,
        },
        Incoming::Candidate => {
            if has_remote_description {
                SignalingAction::AddCandidate
            } else {
                SignalingAction::BufferCandidate
            }
        }
    }
}

/// Whether the local side makes the first offer to a newly seen peer.
///
/// The peer that joined earlier initiates; equal join times fall back to pub
/// ordering. Both sides evaluate this identically, so exactly one of them
/// offers.
pub fn should_initiate(
    local_joined_at: i64,
    local: &UserPub,
    remote_joined_at: i64,
    remote: &UserPub,
) -> bool {
    (local_joined_at, local) < (remote_joined_at, remote)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pubs() -> (UserPub, UserPub) {
        (UserPub([1; 32]), UserPub([2; 32]))
    }

    #[test]
    fn exactly_one_side_initiates() {
        let (a, b) = pubs();
        for (ja, jb) in [(10, 20), (20, 10), (15, 15)] {
            let a_offers = should_initiate(ja, &a, jb, &b);
            let b_offers = should_initiate(jb, &b, ja, &a);
            assert_ne!(a_offers, b_offers, "join times {ja}/{jb}");
        }
        assert!(should_initiate(10, &b, 20, &a));
    }

    #[test]
    fn offer_collision_resolves_by_pub() {
        let (small, large) = pubs();
        assert_eq!(
            decide(Incoming::Offer, SignalingState::HaveLocalOffer, false, &small, &large),
            SignalingAction::IgnoreOffer
        );
        assert_eq!(
            decide(Incoming::Offer, SignalingState::HaveLocalOffer, false, &large, &small),
            SignalingAction::RollbackAndAccept
        );
        assert_eq!(
            decide(Incoming::Offer, SignalingState::Stable, true, &small, &large),
            SignalingAction::AcceptOffer
        );
    }

    #[test]
    fn stray_answers_are_ignored() {
        let (a, b) = pubs();
        let stale = [
            SignalingState::Stable,
            SignalingState::HaveRemoteOffer,
            SignalingState::Closed,
        ];
        for state in stale {
            let action = decide(Incoming::Answer, state, true, &a, &b);
            assert_eq!(action, SignalingAction::IgnoreAnswer);
        }
        assert_eq!(
            decide(Incoming::Answer, SignalingState::HaveLocalOffer, false, &a, &b),
            SignalingAction::ApplyAnswer
        );
    }

    #[test]
    fn early_candidates_are_buffered() {
        let (a, b) = pubs();
        assert_eq!(
            decide(Incoming::Candidate, SignalingState::HaveLocalOffer, false, &a, &b),
            SignalingAction::BufferCandidate
        );
        assert_eq!(
            decide(Incoming::Candidate, SignalingState::Stable, true, &a, &b),
            SignalingAction::AddCandidate
        );
    }
}
