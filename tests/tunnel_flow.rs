//! End-to-end tunnel flows exercised against the public API: the SYN
//! handshake, echoed data, retransmission, the DNS name codec and answer
//! reassembly, and an encrypted exchange with a simulated server.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use burrow::controller::Controller;
use burrow::crypto::{Encryptor, Role};
use burrow::dns::{Message, RData, Record, RecordType, CLASS_IN};
use burrow::drivers::SessionDriver;
use burrow::packet::{Packet, PacketBody};
use burrow::session::{Session, SessionParams, RETRANSMIT_DELAY};
use burrow::tunnel::{decode_answers, encode_name};

/// A scriptable driver: the test pushes bytes in and inspects what the
/// session delivered.
#[derive(Clone, Default)]
struct ScriptedDriver {
    state: Arc<Mutex<ScriptedState>>,
}

#[derive(Default)]
struct ScriptedState {
    outgoing: VecDeque<u8>,
    received: Vec<u8>,
    finished: bool,
}

impl ScriptedDriver {
    fn push(&self, data: &[u8]) {
        self.state.lock().unwrap().outgoing.extend(data);
    }

    fn received(&self) -> Vec<u8> {
        self.state.lock().unwrap().received.clone()
    }

    fn finish(&self) {
        self.state.lock().unwrap().finished = true;
    }
}

#[async_trait]
impl SessionDriver for ScriptedDriver {
    async fn data_received(&mut self, data: &[u8]) {
        self.state.lock().unwrap().received.extend_from_slice(data);
    }

    fn get_outgoing(&mut self, max: usize) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        if state.outgoing.is_empty() {
            return None;
        }
        let take = max.min(state.outgoing.len());
        Some(state.outgoing.drain(..take).collect())
    }

    async fn close(&mut self) {}

    fn is_shutdown(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.finished && state.outgoing.is_empty()
    }
}

const MAX: usize = 110;

fn parse(bytes: &[u8]) -> Packet {
    Packet::parse(bytes).expect("well-formed packet")
}

fn msg_from(session_id: u16, seq: u16, ack: u16, data: &[u8]) -> Vec<u8> {
    Packet {
        packet_id: 0x7777,
        session_id,
        body: PacketBody::Msg { seq, ack, data: data.to_vec() },
    }
    .to_bytes()
}

fn syn_from(session_id: u16, seq: u16) -> Vec<u8> {
    Packet {
        packet_id: 0x7777,
        session_id,
        body: PacketBody::Syn { seq, options: 0, name: None },
    }
    .to_bytes()
}

#[tokio::test]
async fn handshake_then_echo() {
    let driver = ScriptedDriver::default();
    let session = Session::new(
        Box::new(driver.clone()),
        SessionParams {
            name: Some("t".into()),
            isn: Some(0x1234),
            ..Default::default()
        },
    );
    let id = session.id();

    let mut controller = Controller::new();
    controller.add_session(session);

    // The client keeps offering its SYN until the peer answers.
    let syn = controller.outgoing(MAX).expect("SYN");
    match parse(&syn).body {
        PacketBody::Syn { seq, options, name } => {
            assert_eq!(seq, 0x1234);
            assert_eq!(options & 0x0001, 0x0001);
            assert_eq!(name.as_deref(), Some("t"));
        }
        other => panic!("expected SYN, got {:?}", other),
    }

    assert!(controller.incoming(&syn_from(id, 0x5678)).await);

    // Driver data flows out as a MSG with the right seq/ack pair.
    driver.push(&[0x41, 0x42, 0x43]);
    controller.pump_drivers().await;
    let msg = controller.outgoing(MAX).expect("MSG");
    match parse(&msg).body {
        PacketBody::Msg { seq, ack, data } => {
            assert_eq!(seq, 0x1234);
            assert_eq!(ack, 0x5678);
            assert_eq!(data, vec![0x41, 0x42, 0x43]);
        }
        other => panic!("expected MSG, got {:?}", other),
    }

    // The peer ACKs our three bytes and sends three of its own.
    assert!(controller.incoming(&msg_from(id, 0x5678, 0x1237, &[0x61, 0x62, 0x63])).await);
    assert_eq!(driver.received(), vec![0x61, 0x62, 0x63]);

    // Next MSG reflects the advanced window on both sides.
    let next = controller.outgoing(MAX).expect("follow-up MSG");
    match parse(&next).body {
        PacketBody::Msg { seq, ack, data } => {
            assert_eq!(seq, 0x1237);
            assert_eq!(ack, 0x567b);
            assert!(data.is_empty());
        }
        other => panic!("expected MSG, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn lost_reply_causes_identical_retransmission() {
    let driver = ScriptedDriver::default();
    let session = Session::new(
        Box::new(driver.clone()),
        SessionParams { isn: Some(0x1000), ..Default::default() },
    );
    let id = session.id();

    let mut controller = Controller::new();
    controller.add_session(session);

    let _syn = controller.outgoing(MAX).expect("SYN");
    controller.incoming(&syn_from(id, 0x2000)).await;

    driver.push(&[0x41]);
    controller.pump_drivers().await;

    let first = controller.outgoing(MAX).expect("window");
    // Nothing new before the timer runs out.
    assert!(controller.outgoing(MAX).is_none());

    tokio::time::advance(RETRANSMIT_DELAY + Duration::from_millis(50)).await;
    let second = controller.outgoing(MAX).expect("retransmission");
    assert_eq!(first, second, "retransmission must be bitwise identical");

    // Once ACKed, the window moves on.
    controller.incoming(&msg_from(id, 0x2000, 0x1001, &[])).await;
    let third = controller.outgoing(MAX).expect("fresh window");
    assert_ne!(first, third);
}

#[tokio::test]
async fn session_drains_and_is_reaped() {
    let driver = ScriptedDriver::default();
    let session = Session::new(
        Box::new(driver.clone()),
        SessionParams { isn: Some(0x1000), ..Default::default() },
    );
    let id = session.id();

    let mut controller = Controller::new();
    controller.add_session(session);

    let _syn = controller.outgoing(MAX).expect("SYN");
    controller.incoming(&syn_from(id, 0x2000)).await;

    driver.push(b"bye");
    driver.finish();
    controller.pump_drivers().await;

    let msg = controller.outgoing(MAX).expect("last data");
    assert!(matches!(parse(&msg).body, PacketBody::Msg { .. }));
    controller.incoming(&msg_from(id, 0x2000, 0x1003, &[])).await;

    let fin = controller.outgoing(MAX).expect("FIN");
    assert!(matches!(parse(&fin).body, PacketBody::Fin { .. }));

    controller.reap();
    assert!(controller.is_finished());
}

#[tokio::test]
async fn encrypted_exchange_against_simulated_server() {
    let driver = ScriptedDriver::default();
    let session = Session::new(
        Box::new(driver.clone()),
        SessionParams {
            isn: Some(0x1000),
            encryption: true,
            preshared: Some("hunter2".into()),
            ..Default::default()
        },
    );
    let id = session.id();

    let mut controller = Controller::new();
    controller.add_session(session);

    let _syn = controller.outgoing(MAX).expect("SYN");
    controller.incoming(&syn_from(id, 0x2000)).await;

    // Key exchange.
    let init = controller.outgoing(MAX).expect("ENC/INIT");
    let client_key = match parse(&init).body {
        PacketBody::Enc { body: burrow::packet::EncBody::Init { public_key }, .. } => public_key,
        other => panic!("expected ENC/INIT, got {:?}", other),
    };
    let mut server = Encryptor::new(Role::Server, Some("hunter2".into()));
    server.set_their_public_key(&client_key).unwrap();
    controller
        .incoming(&Packet::enc_init(id, server.public_key()).to_bytes())
        .await;

    // Authenticator exchange.
    let auth = controller.outgoing(MAX).expect("ENC/AUTH");
    match parse(&auth).body {
        PacketBody::Enc { body: burrow::packet::EncBody::Auth { authenticator }, .. } => {
            assert!(server.verify_their_authenticator(&authenticator));
        }
        other => panic!("expected ENC/AUTH, got {:?}", other),
    }
    controller
        .incoming(&Packet::enc_auth(id, server.my_authenticator().unwrap()).to_bytes())
        .await;

    // Data now crosses encrypted in both directions.
    driver.push(b"uname -a");
    controller.pump_drivers().await;
    let frame = controller.outgoing(MAX).expect("encrypted MSG");
    assert!(
        !frame.windows(8).any(|window| window == b"uname -a"),
        "payload must not cross the wire in the clear"
    );

    let (_, plain) = server.decrypt_packet(&frame).unwrap();
    let (seq, ack) = match parse(&plain).body {
        PacketBody::Msg { seq, ack, data } => {
            assert_eq!(data, b"uname -a");
            (seq, ack)
        }
        other => panic!("expected MSG, got {:?}", other),
    };
    assert_eq!((seq, ack), (0x1000, 0x2000));

    let reply = Packet {
        packet_id: 0x7777,
        session_id: id,
        body: PacketBody::Msg {
            seq: 0x2000,
            ack: seq.wrapping_add(8),
            data: b"Linux".to_vec(),
        },
    };
    let reply_frame = server.encrypt_packet(&reply.to_bytes()).unwrap();
    assert!(controller.incoming(&reply_frame).await);
    assert_eq!(driver.received(), b"Linux");
}

#[test]
fn question_name_round_trips_through_dns() {
    // Payload -> name -> DNS query -> wire -> parse -> same name.
    let payload = [0x00u8, 0x01, 0x02, 0xff];
    let name = encode_name(&payload, Some("example.com"));
    assert_eq!(name, "000102ff.example.com");

    let query = Message::query(0x1234, name.clone(), RecordType::Txt);
    let parsed = Message::parse(&query.to_bytes().unwrap()).unwrap();
    assert_eq!(parsed.questions.len(), 1);
    assert_eq!(parsed.questions[0].name, name);
}

#[test]
fn txt_answer_decodes_to_payload() {
    let mut reply = Message::query(0x1234, "000102ff.example.com", RecordType::Txt);
    reply.response = true;
    reply.answers.push(Record {
        name: "000102ff.example.com".into(),
        class: CLASS_IN,
        ttl: 60,
        rdata: RData::Txt(b"030405".to_vec()),
    });

    // Through the wire and back before decoding, like a real reply.
    let parsed = Message::parse(&reply.to_bytes().unwrap()).unwrap();
    let payload = decode_answers(&parsed, Some("example.com")).unwrap();
    assert_eq!(payload, vec![0x03, 0x04, 0x05]);
}

#[test]
fn a_answers_reassemble_with_length_prefix() {
    let mut reply = Message::query(0x1234, "00.example.com", RecordType::A);
    reply.response = true;
    for addr in [
        Ipv4Addr::new(30, 7, 8, 9),
        Ipv4Addr::new(10, 1, 2, 3),
        Ipv4Addr::new(20, 4, 5, 6),
    ] {
        reply.answers.push(Record {
            name: "00.example.com".into(),
            class: CLASS_IN,
            ttl: 60,
            rdata: RData::A(addr),
        });
    }

    let parsed = Message::parse(&reply.to_bytes().unwrap()).unwrap();
    let payload = decode_answers(&parsed, Some("example.com")).unwrap();
    assert_eq!(payload, vec![0x02]);
}

#[test]
fn cname_answer_decodes_to_payload() {
    let mut reply = Message::query(0x1234, "00.example.com", RecordType::Cname);
    reply.response = true;
    reply.answers.push(Record {
        name: "00.example.com".into(),
        class: CLASS_IN,
        ttl: 60,
        rdata: RData::Cname("deadbeef.example.com".into()),
    });

    let parsed = Message::parse(&reply.to_bytes().unwrap()).unwrap();
    let payload = decode_answers(&parsed, Some("example.com")).unwrap();
    assert_eq!(payload, vec![0xde, 0xad, 0xbe, 0xef]);
}

#[test]
fn error_rcode_yields_no_payload() {
    let mut reply = Message::query(0x1234, "00.example.com", RecordType::Txt);
    reply.response = true;
    reply.rcode = burrow::dns::Rcode::ServerFailure;
    let parsed = Message::parse(&reply.to_bytes().unwrap()).unwrap();
    assert!(decode_answers(&parsed, Some("example.com")).is_none());
}
