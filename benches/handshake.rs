use criterion::{black_box, criterion_group, criterion_main, Criterion};

use offgrid_node::{Identity, SessionChannel, SessionConfig};

fn bench_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake");
    let client = Identity::generate("client");
    let server = Identity::generate("server");
    let server_pub = server.kx_public();

    // Initiate, respond and confirm: one full session setup per iteration.
    group.bench_function("fresh_session", |b| {
        b.iter(|| {
            let (initiator, msg1) =
                SessionChannel::initiate(&client, &server_pub, SessionConfig::default()).unwrap();
            let (responder, msg2) =
                SessionChannel::respond(&server, &msg1, SessionConfig::default()).unwrap();
            initiator.confirm(&msg2).unwrap();
            black_box((initiator, responder));
        });
    });

    // Responder side only, with a pre-built first message.
    let (_, msg1) =
        SessionChannel::initiate(&client, &server_pub, SessionConfig::default()).unwrap();
    group.bench_function("respond", |b| {
        b.iter(|| {
            black_box(
                SessionChannel::respond(&server, black_box(&msg1), SessionConfig::default())
                    .unwrap(),
            );
        });
    });

    group.finish();
}

criterion_group!(benches, bench_handshake);
criterion_main!(benches);
