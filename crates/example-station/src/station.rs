//! Simulated station state

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use charge_core::StationId;
use charge_link::{encode_status, CommandCodec, STATUS_FRAME_MIN_LEN};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What an inbound frame asked the station to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Read,
    /// Valid checksum but no known command for this station
    Unknown,
    /// Checksum mismatch
    Corrupt,
}

/// Charging flag plus a log of every frame received
pub struct StationState {
    id: u8,
    codec: CommandCodec,
    /// Known command frames for this station, precomputed
    commands: Vec<(Vec<u8>, Action)>,
    charging: AtomicBool,
    received: Mutex<Vec<Vec<u8>>>,
    received_count: watch::Sender<usize>,
}

impl StationState {
    pub fn new(id: u8) -> Self {
        let codec = CommandCodec::modbus();
        let station_id = StationId::from_byte(id);
        let commands = [("start", Action::Start), ("stop", Action::Stop), ("read", Action::Read)]
            .into_iter()
            .filter_map(|(name, action)| {
                codec
                    .encode(&station_id, name)
                    .ok()
                    .map(|frame| (frame.to_vec(), action))
            })
            .collect();

        Self {
            id,
            codec,
            commands,
            charging: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
            received_count: watch::channel(0).0,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn is_charging(&self) -> bool {
        self.charging.load(Ordering::SeqCst)
    }

    /// Frames received so far, oldest first
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().clone()
    }

    pub fn received_count(&self) -> usize {
        *self.received_count.borrow()
    }

    /// Wait until at least `count` frames have arrived
    pub async fn wait_for_frames(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.received_count.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|&n| n >= count))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    pub fn classify(&self, frame: &[u8]) -> Action {
        if !self.codec.verify(frame) {
            return Action::Corrupt;
        }
        self.commands
            .iter()
            .find(|(known, _)| known.as_slice() == frame)
            .map(|(_, action)| *action)
            .unwrap_or(Action::Unknown)
    }

    /// Cut a stream read into frames
    ///
    /// Known command frames are peeled off the front; whatever is left over
    /// is treated as one frame.
    pub fn split_frames<'a>(&self, mut data: &'a [u8]) -> Vec<&'a [u8]> {
        let mut frames = Vec::new();
        while !data.is_empty() {
            let len = self
                .commands
                .iter()
                .map(|(known, _)| known.as_slice())
                .find(|known| data.starts_with(known))
                .map_or(data.len(), <[u8]>::len);
            let (frame, rest) = data.split_at(len);
            frames.push(frame);
            data = rest;
        }
        frames
    }

    /// Apply one inbound frame and build the status reply
    pub fn handle_frame(&self, frame: &[u8]) -> [u8; STATUS_FRAME_MIN_LEN] {
        self.received.lock().push(frame.to_vec());
        self.received_count.send_modify(|n| *n += 1);

        let action = self.classify(frame);
        debug!(station = self.id, frame = %hex::encode(frame), ?action, "Frame received");

        let mut error = 0u8;
        match action {
            Action::Start => {
                if !self.charging.swap(true, Ordering::SeqCst) {
                    info!(station = self.id, "Charging started");
                }
            }
            Action::Stop => {
                if self.charging.swap(false, Ordering::SeqCst) {
                    info!(station = self.id, "Charging stopped");
                }
            }
            Action::Read | Action::Unknown => {}
            Action::Corrupt => {
                warn!(station = self.id, frame = %hex::encode(frame), "Checksum mismatch");
                error |= 0b1;
            }
        }

        encode_status(self.id, u8::from(self.is_charging()), error, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(id: u8, cmd: &str) -> Vec<u8> {
        CommandCodec::modbus()
            .encode(&StationId::from_byte(id), cmd)
            .unwrap()
            .to_vec()
    }

    #[test]
    fn start_then_stop_toggles_charging() {
        let station = StationState::new(1);

        let reply = station.handle_frame(&frame(1, "start"));
        assert!(station.is_charging());
        assert_eq!(reply, [0x01, 0x00, 0x00, 0x01, 0x00, 0x00]);

        let reply = station.handle_frame(&frame(1, "stop"));
        assert!(!station.is_charging());
        assert_eq!(reply, [0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn read_reports_without_changing_state() {
        let station = StationState::new(2);
        station.handle_frame(&frame(2, "start"));

        let reply = station.handle_frame(&frame(2, "read"));
        assert_eq!(station.classify(&frame(2, "read")), Action::Read);
        assert_eq!(reply[3], 0x01);
        assert!(station.is_charging());
    }

    #[test]
    fn bad_checksum_sets_error_bit() {
        let station = StationState::new(1);
        let mut corrupt = frame(1, "start");
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let reply = station.handle_frame(&corrupt);
        assert_eq!(reply[4], 0x01);
        assert!(!station.is_charging());
    }

    #[test]
    fn frame_for_other_station_is_unknown() {
        let station = StationState::new(1);
        assert_eq!(station.classify(&frame(2, "start")), Action::Unknown);
    }

    #[test]
    fn splits_back_to_back_frames() {
        let station = StationState::new(1);
        let mut data = frame(1, "stop");
        data.extend(frame(1, "read"));
        data.extend([0xAA, 0xBB]);

        let frames = station.split_frames(&data);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], frame(1, "stop").as_slice());
        assert_eq!(frames[1], frame(1, "read").as_slice());
        assert_eq!(frames[2], &[0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn records_received_frames() {
        let station = StationState::new(1);
        station.handle_frame(&frame(1, "start"));
        station.handle_frame(&frame(1, "read"));

        assert!(station.wait_for_frames(2, Duration::from_millis(100)).await);
        assert_eq!(station.received_count(), 2);
        assert_eq!(station.received(), vec![frame(1, "start"), frame(1, "read")]);
        assert!(!station.wait_for_frames(3, Duration::from_millis(20)).await);
    }
}
