//! Secure loopback scenarios: user-keyed SRTP with fault injection, ZRTP
//! Diffie-Hellman negotiation and Multistream reuse.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rtpkit::{Context, MediaFormat, RceFlags, RtpFlags};

fn localhost() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

#[test]
fn srtp_user_key_round_trip_and_tamper_drop() {
    let ctx = Context::new();
    let send_session = ctx.create_session(localhost(), Some(localhost()));
    let recv_session = ctx.create_session(localhost(), Some(localhost()));

    let rce = RceFlags::SRTP | RceFlags::SRTP_KMNGMNT_USER;
    let sender = send_session
        .create_stream(9500, 9502, MediaFormat::Generic, rce)
        .unwrap();
    let receiver = recv_session
        .create_stream(9502, 9500, MediaFormat::Generic, rce)
        .unwrap();

    let key: Vec<u8> = (0u8..16).collect();
    let salt: Vec<u8> = (0u8..14).map(|i| 2 * i).collect();
    sender.add_srtp_ctx(&key, &salt).unwrap();
    receiver.add_srtp_ctx(&key, &salt).unwrap();

    // Fault injection: runs after SRTP protection, corrupting one
    // ciphertext byte when armed.
    let corrupt = Arc::new(AtomicBool::new(false));
    let armed = Arc::clone(&corrupt);
    sender.install_pre_send_handler(Box::new(move |pkt| {
        if armed.load(Ordering::SeqCst) && pkt.len() > 20 {
            pkt[14] ^= 0x01;
        }
        Ok(())
    }));

    for _ in 0..10 {
        sender
            .push_frame(b"Hello, world!", RtpFlags::NO_FLAGS)
            .unwrap();
    }
    for i in 0..10 {
        let got = receiver
            .pull_frame(Some(Duration::from_secs(3)))
            .unwrap_or_else(|| panic!("frame {i} missing"));
        assert_eq!(got.payload.as_ref(), b"Hello, world!");
    }

    // The tampered packet must fail authentication and never surface.
    corrupt.store(true, Ordering::SeqCst);
    sender
        .push_frame(b"Hello, world!", RtpFlags::NO_FLAGS)
        .unwrap();
    assert!(receiver.pull_frame(Some(Duration::from_millis(500))).is_none());

    // Clean traffic resumes once the fault clears.
    corrupt.store(false, Ordering::SeqCst);
    sender
        .push_frame(b"Hello, world!", RtpFlags::NO_FLAGS)
        .unwrap();
    assert!(receiver.pull_frame(Some(Duration::from_secs(3))).is_some());

    send_session.destroy_stream(&sender);
    recv_session.destroy_stream(&receiver);
}

#[test]
fn zrtp_dh_then_media_and_multistream() {
    let rce_dh = RceFlags::SRTP | RceFlags::SRTP_KMNGMNT_ZRTP | RceFlags::ZRTP_DIFFIE_HELLMAN_MODE;

    let ctx_a = Context::new();
    let ctx_b = Context::new();
    let session_a = Arc::new(ctx_a.create_session(localhost(), Some(localhost())));
    let session_b = Arc::new(ctx_b.create_session(localhost(), Some(localhost())));

    // Stream creation blocks in the key agreement, so both sides run on
    // their own thread.
    let started = Instant::now();
    let sa = Arc::clone(&session_a);
    let ha = thread::spawn(move || sa.create_stream(9400, 9402, MediaFormat::Generic, rce_dh));
    let sb = Arc::clone(&session_b);
    let hb = thread::spawn(move || sb.create_stream(9402, 9400, MediaFormat::Generic, rce_dh));

    let stream_a = ha.join().unwrap().expect("side A negotiation failed");
    let stream_b = hb.join().unwrap().expect("side B negotiation failed");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "DH negotiation took {:?}",
        started.elapsed()
    );

    // Media flows encrypted in both directions.
    let payload = vec![0xC3u8; 1000];
    for _ in 0..10 {
        stream_a.push_frame(&payload, RtpFlags::NO_FLAGS).unwrap();
    }
    for i in 0..10 {
        let got = stream_b
            .pull_frame(Some(Duration::from_secs(3)))
            .unwrap_or_else(|| panic!("frame {i} missing on B"));
        assert_eq!(got.payload.as_ref(), &payload[..]);
    }
    for _ in 0..10 {
        stream_b.push_frame(&payload, RtpFlags::NO_FLAGS).unwrap();
    }
    for i in 0..10 {
        let got = stream_a
            .pull_frame(Some(Duration::from_secs(3)))
            .unwrap_or_else(|| panic!("frame {i} missing on A"));
        assert_eq!(got.payload.as_ref(), &payload[..]);
    }

    // Multistream: a second stream per session reuses the ZRTP session key
    // and must come up without a DH exchange.
    let rce_mult = RceFlags::SRTP | RceFlags::SRTP_KMNGMNT_ZRTP | RceFlags::ZRTP_MULTISTREAM_MODE;
    let mult_started = Instant::now();
    let sa = Arc::clone(&session_a);
    let ha = thread::spawn(move || sa.create_stream(9404, 9406, MediaFormat::Generic, rce_mult));
    let sb = Arc::clone(&session_b);
    let hb = thread::spawn(move || sb.create_stream(9406, 9404, MediaFormat::Generic, rce_mult));

    let mult_a = ha.join().unwrap().expect("multistream A failed");
    let mult_b = hb.join().unwrap().expect("multistream B failed");
    assert!(
        mult_started.elapsed() < Duration::from_secs(2),
        "multistream negotiation took {:?}",
        mult_started.elapsed()
    );

    for _ in 0..10 {
        mult_a.push_frame(&payload, RtpFlags::NO_FLAGS).unwrap();
    }
    for i in 0..10 {
        let got = mult_b
            .pull_frame(Some(Duration::from_secs(3)))
            .unwrap_or_else(|| panic!("multistream frame {i} missing"));
        assert_eq!(got.payload.as_ref(), &payload[..]);
    }

    session_a.destroy_stream(&stream_a);
    session_a.destroy_stream(&mult_a);
    session_b.destroy_stream(&stream_b);
    session_b.destroy_stream(&mult_b);
}
