//! Per-service state machine: `Idle -> Probing -> Announcing -> Registered`,
//! with conflict and exit transitions (spec §4.5.2-§4.5.4).

use std::time::Instant;

use crate::codec::Message;
use crate::collab::Random;
use crate::error::Result;
use crate::scheduler::{Scheduler, TaskKey};

use super::repeater::PacketRepeater;
use super::repository::{RecordRepository, ServiceId};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdvertiserState {
    Idle,
    Probing,
    Announcing,
    Registered,
    /// Sending goodbyes before removal.
    Exiting,
}

/// Drives one service's `PacketRepeater` through probing and announcing,
/// exposing the points at which the owner must actually transmit a packet.
pub struct InterfaceAdvertiser {
    service: ServiceId,
    state: AdvertiserState,
    repeater: Option<PacketRepeater>,
}

/// What the caller should do as a result of a scheduler fire or an inbound
/// conflicting record.
#[derive(Debug, PartialEq)]
pub enum AdvertiserAction {
    /// Transmit this probe/announcement/goodbye packet now.
    Send(SendKind),
    /// This service lost a probing race; the caller must pick a new name
    /// and re-register (spec §9: rename-on-conflict).
    Conflict,
    /// The state machine has nothing left to do (e.g. goodbyes finished).
    Done,
}

#[derive(Debug, PartialEq)]
pub enum SendKind {
    Probe,
    Announcement,
    Goodbye,
}

impl InterfaceAdvertiser {
    pub fn new(service: ServiceId) -> InterfaceAdvertiser {
        InterfaceAdvertiser {
            service,
            state: AdvertiserState::Idle,
            repeater: None,
        }
    }

    pub fn state(&self) -> AdvertiserState {
        self.state
    }

    /// Begins probing: schedules the first (jittered) probe send.
    pub fn start_probing(&mut self, scheduler: &mut Scheduler, key: TaskKey, now: Instant, random: &dyn Random) {
        let (repeater, jitter) = PacketRepeater::prober(random);
        repeater.start(scheduler, key, now, jitter);
        self.repeater = Some(repeater);
        self.state = AdvertiserState::Probing;
    }

    /// Call when `key`'s deadline fires. Returns the action the owner
    /// should take; `Conflict` is never returned from here (a conflict is
    /// always discovered by the owner inspecting an inbound packet, which
    /// then calls `restart_probing_for_conflict` directly — firing always
    /// means "nothing external interrupted this sequence").
    ///
    /// A phase's last send never leaves a follow-up deadline in the
    /// scheduler (there is nothing left for that phase to wait for), so the
    /// transition into the next phase — including scheduling *its* first
    /// send — happens inline here, on the same call that delivers the
    /// phase's final send.
    pub fn fire(&mut self, scheduler: &mut Scheduler, key: TaskKey, now: Instant) -> AdvertiserAction {
        let send_kind = match self.state {
            AdvertiserState::Probing => SendKind::Probe,
            AdvertiserState::Announcing => SendKind::Announcement,
            AdvertiserState::Exiting => SendKind::Goodbye,
            AdvertiserState::Idle | AdvertiserState::Registered => return AdvertiserAction::Done,
        };

        let repeater = match &mut self.repeater {
            Some(r) => r,
            None => return AdvertiserAction::Done,
        };

        if !repeater.fire(scheduler, key, now) {
            return AdvertiserAction::Done;
        }

        if repeater.is_done() {
            let from = self.state;
            match self.state {
                AdvertiserState::Probing => {
                    self.state = AdvertiserState::Announcing;
                    log::debug!("service {} {:?} -> {:?}", self.service, from, self.state);
                    let announcer = PacketRepeater::announcer();
                    announcer.start(scheduler, key, now, std::time::Duration::from_secs(0));
                    self.repeater = Some(announcer);
                }
                AdvertiserState::Announcing => {
                    self.state = AdvertiserState::Registered;
                    self.repeater = None;
                }
                AdvertiserState::Exiting => {
                    self.state = AdvertiserState::Idle;
                    self.repeater = None;
                }
                AdvertiserState::Idle | AdvertiserState::Registered => {}
            }
            if from != self.state && from != AdvertiserState::Probing {
                log::debug!("service {} {:?} -> {:?}", self.service, from, self.state);
            }
        }

        AdvertiserAction::Send(send_kind)
    }

    /// Restarts probing from whatever state this service was in after a
    /// conflict (spec §4.5.5 `restartProbingForConflict`): cancels any
    /// in-flight probe/announce sequence and begins a fresh probe, under
    /// whatever name the caller has already written into the repository via
    /// `renameServiceForConflict` (spec §9: rename-on-conflict).
    pub fn restart_probing_for_conflict(
        &mut self,
        scheduler: &mut Scheduler,
        key: TaskKey,
        now: Instant,
        random: &dyn Random,
    ) {
        scheduler.cancel(key);
        self.start_probing(scheduler, key, now, random);
    }

    /// Begins the goodbye sequence: a single send is sufficient per RFC
    /// 6762 §10.1, but sending it up to twice guards against loss.
    pub fn start_exiting(&mut self, scheduler: &mut Scheduler, key: TaskKey, now: Instant) {
        self.repeater = Some(PacketRepeater::new(2, std::time::Duration::from_millis(250), false));
        self.state = AdvertiserState::Exiting;
        scheduler.schedule(key, now);
    }

    /// Builds a probe query: a question for the instance name plus the
    /// proposed SRV record in the Authority Section, per RFC 6762 §8.1 and
    /// spec §4.5.1's "ProbingInfo... consisting of the SRV record only".
    pub fn build_probe(&self, repository: &RecordRepository) -> Result<Message> {
        use crate::codec::{Question, Type};

        let service = repository.service(self.service)?;
        let mut message = Message::query(0);
        message
            .questions
            .push(Question::new(service.instance_name.clone(), Type::ANY));
        message.authority = vec![repository.probing_record(self.service)?];
        Ok(message)
    }

    /// Builds the response packet for the current phase, drawing TTLs (and,
    /// while exiting, the zero-TTL goodbye form) from `repository`.
    pub fn build_response(&self, repository: &RecordRepository) -> Result<Message> {
        let ttl_override = match self.state {
            AdvertiserState::Exiting => Some(0),
            _ => None,
        };
        let mut message = Message::response(0);
        message.answers = repository.service_records(self.service, ttl_override)?;
        message.additional = vec![repository.uniqueness_nsec_for(self.service, ttl_override)?];
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::OsRandom;

    #[test]
    fn probing_then_announcing_then_registered() {
        let mut adv = InterfaceAdvertiser::new(1);
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        adv.start_probing(&mut scheduler, 1, now, &OsRandom);
        assert_eq!(adv.state(), AdvertiserState::Probing);

        let mut sends = 0;
        let deadline = now + std::time::Duration::from_secs(5);
        while adv.state() == AdvertiserState::Probing {
            match adv.fire(&mut scheduler, 1, deadline) {
                AdvertiserAction::Send(SendKind::Probe) => sends += 1,
                other => panic!("unexpected action during probing: {:?}", other),
            }
        }
        assert_eq!(sends, 3, "RFC 6762 requires exactly 3 probes");
        assert_eq!(adv.state(), AdvertiserState::Announcing);

        let mut announcements = 0;
        while adv.state() == AdvertiserState::Announcing {
            match adv.fire(&mut scheduler, 1, deadline + std::time::Duration::from_secs(300)) {
                AdvertiserAction::Send(SendKind::Announcement) => announcements += 1,
                other => panic!("unexpected action during announcing: {:?}", other),
            }
        }
        assert_eq!(announcements, 8, "RFC 6762 requires exactly 8 announcements");
        assert_eq!(adv.state(), AdvertiserState::Registered);
    }

    #[test]
    fn restart_probing_for_conflict_reprobes_from_any_state() {
        let mut adv = InterfaceAdvertiser::new(1);
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        adv.start_probing(&mut scheduler, 1, now, &OsRandom);
        adv.state = AdvertiserState::Registered;
        adv.repeater = None;

        adv.restart_probing_for_conflict(&mut scheduler, 1, now, &OsRandom);
        assert_eq!(adv.state(), AdvertiserState::Probing);
        assert!(!scheduler.is_empty());
    }
}
