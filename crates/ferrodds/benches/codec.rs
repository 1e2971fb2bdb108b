// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Submessage codec benchmarks: DATA encode/decode and parameter-list
//! parsing, the two hot paths of the receive loop.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use ferrodds::core::guid::EntityId;
use ferrodds::core::sequence_number::SequenceNumber;
use ferrodds::protocol::constants::{PID_KEY_HASH, PID_STATUS_INFO};
use ferrodds::protocol::cursor::ByteReader;
use ferrodds::protocol::header::SubmessageHeader;
use ferrodds::protocol::submessage::DataSubmessage;
use ferrodds::protocol::{Parameter, ParameterList};

fn bench_data_encode(c: &mut Criterion) {
    let payload = vec![0xa5u8; 1024];
    let data = DataSubmessage::new_data(
        EntityId::UNKNOWN,
        EntityId::user(1, 0x03),
        SequenceNumber(42),
        payload,
    );

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(1024));
    group.bench_function("data_encode_1k", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(1100);
            data.encode(&mut buf, true);
            buf
        });
    });

    let mut encoded = Vec::new();
    data.encode(&mut encoded, true);
    group.bench_function("data_decode_1k", |b| {
        b.iter(|| {
            let (hdr, body, _) = SubmessageHeader::split(&encoded).unwrap();
            DataSubmessage::decode(hdr.flags, body, hdr.little_endian()).unwrap()
        });
    });
    group.finish();
}

fn bench_parameter_list(c: &mut Criterion) {
    let mut list = ParameterList::new();
    list.push(Parameter::from_string(0x0005, "sensors/imu"));
    list.push(Parameter::from_string(0x0007, "ImuSample"));
    list.push(Parameter::from_u32(PID_STATUS_INFO, 0));
    list.push(Parameter::new(PID_KEY_HASH, vec![7; 16]));
    let mut encoded = Vec::new();
    list.encode(&mut encoded, true);

    c.bench_function("parameter_list_parse", |b| {
        b.iter(|| {
            let mut reader = ByteReader::new(&encoded, true);
            ParameterList::decode(&mut reader, false).unwrap()
        });
    });
}

criterion_group!(benches, bench_data_encode, bench_parameter_list);
criterion_main!(benches);
