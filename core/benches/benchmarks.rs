//! Performance benchmarks for the burst and admission paths

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::net::IpAddr;
use treeircd_core::burst::{ban_mode_lines, fjoin_lines};
use treeircd_core::*;

fn channel_with(members: usize, bans: usize) -> Channel {
    let mut channel = Channel::new("#bench", 1_700_000_000);
    channel.modes.insert('n', None);
    channel.modes.insert('t', None);
    for i in 0..members {
        channel.members.push(Membership {
            uid: format!("0AA{:06}", i),
            modes: if i % 10 == 0 { "o".to_string() } else { String::new() },
        });
    }
    for i in 0..bans {
        channel.bans.push(BanEntry {
            mask: format!("*!*@host{}.example.net", i),
            set_by: "oper".to_string(),
            set_at: 1_700_000_000,
        });
    }
    channel
}

fn benchmark_fjoin_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("fjoin_split");

    for members in [0usize, 10, 100, 1000, 10000] {
        let channel = channel_with(members, 0);
        group.bench_with_input(BenchmarkId::from_parameter(members), &channel, |b, channel| {
            b.iter(|| fjoin_lines(black_box("0AA"), black_box(channel)))
        });
    }

    group.finish();
}

fn benchmark_ban_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("ban_mode_lines");

    for bans in [1usize, 20, 200] {
        let channel = channel_with(0, bans);
        group.bench_with_input(BenchmarkId::from_parameter(bans), &channel, |b, channel| {
            b.iter(|| ban_mode_lines(black_box("0AA"), black_box(channel), 20))
        });
    }

    group.finish();
}

fn benchmark_message_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_parsing");

    let messages = vec![
        ":0AA BURST 1700000000",
        ":0AA UID 0AAAAAAAB 1700000000 alice host realhost alice 203.0.113.5 1700000001 +iw :Alice",
        ":0AA FJOIN #rust 1700000000 +nt :o,0AAAAAAAB ,0AAAAAAAC v,0AAAAAAAD",
        ":0AA ADDLINE G *@spam.example oper 1700000000 0 :Spamming",
    ];

    for msg in messages {
        group.bench_with_input(BenchmarkId::from_parameter(msg.len()), msg, |b, msg| {
            b.iter(|| Message::parse(black_box(msg)))
        });
    }

    group.finish();
}

fn benchmark_clone_registry(c: &mut Criterion) {
    let registry = CloneRegistry::new();
    let addrs: Vec<IpAddr> = (0..256u32)
        .map(|i| IpAddr::from([203, 0, 113, i as u8]))
        .collect();

    c.bench_function("clone_add_remove", |b| {
        b.iter(|| {
            for addr in &addrs {
                registry.add(*addr, CloneScope::Local);
            }
            for addr in &addrs {
                registry.remove(*addr, CloneScope::Local);
            }
        })
    });
}

criterion_group!(
    benches,
    benchmark_fjoin_split,
    benchmark_ban_lines,
    benchmark_message_parsing,
    benchmark_clone_registry
);
criterion_main!(benches);
