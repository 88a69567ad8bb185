use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pitlight::{
    FlagStatus, Logger,
    logging::RecordingSink,
    telemetry::{
        IRacingReader, TelemetryProvider,
        flags::{FLAG_BLUE, FLAG_GREEN, FLAG_YELLOW},
        layout::{SegmentHeader, SegmentImageBuilder, TrackedValues, parse_var_descriptors},
        process::ManualProcessProbe,
        producer::ReaderSettings,
        segment::MemorySegmentOpener,
        session_info::SessionDetails,
    },
};

const SESSION_INFO: &str = "WeekendInfo:
 TrackDisplayName: Circuit de Spa-Francorchamps
SessionInfo:
 Sessions:
 - SessionNum: 0
   SessionType: Race
DriverInfo:
 DriverCarIdx: 3
 Drivers:
 - CarIdx: 0
   CarScreenName: Porsche 911 GT3 R
 - CarIdx: 1
   CarScreenName: Ferrari 296 GT3
 - CarIdx: 2
   CarScreenName: BMW M4 GT3
 - CarIdx: 3
   CarScreenName: Audi R8 LMS GT3
";

/// A segment with every tracked variable plus untracked filler, roughly the
/// shape of a real session.
fn create_segment_image(tick: i32) -> Vec<u8> {
    let mut builder = SegmentImageBuilder::new()
        .tick_count(tick)
        .session_info(SESSION_INFO)
        .var_bitfield("SessionFlags", FLAG_GREEN | FLAG_BLUE)
        .var_i32("SessionNum", 0)
        .var_i32("SessionState", 4)
        .var_f64("SessionTime", 1234.5)
        .var_f64("SessionTimeRemain", 600.0)
        .var_i32("Lap", 12)
        .var_i32("LapCompleted", 11)
        .var_i32("SessionLapsTotal", 30)
        .var_f32("Speed", 61.2)
        .var_f32("RPM", 7800.0)
        .var_i32("Gear", 5)
        .var_f32("Throttle", 1.0)
        .var_f32("Brake", 0.0)
        .var_f32("Clutch", 0.0)
        .var_i32("PlayerCarPosition", 4)
        .var_i32("PlayerCarClassPosition", 2)
        .var_f32("FuelLevel", 42.0)
        .var_f32("FuelUsePerLap", 2.9)
        .var_f32("LapLastLapTime", 138.2)
        .var_f32("LapBestLapTime", 137.9)
        .var_bool("IsOnTrack", true)
        .var_bool("IsInGarage", false)
        .var_bool("OnPitRoad", false)
        .var_i32("PlayerCarIdx", 3);
    for i in 0..200 {
        builder = builder.var_f32(&format!("Filler{i}"), i as f32);
    }
    builder.build()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_decode");
    let image = create_segment_image(1);
    let header = SegmentHeader::parse(&image).unwrap();
    let table_start = header.var_header_offset as usize;
    let table = &image[table_start..table_start + header.var_table_len()];
    let descriptors = parse_var_descriptors(table, header.num_vars as usize).unwrap();
    let data_start = header.data_offset();
    let data = &image[data_start..data_start + header.buf_len as usize];

    group.bench_function("parse_header", |b| {
        b.iter(|| black_box(SegmentHeader::parse(black_box(&image)).unwrap()));
    });

    group.bench_function("parse_var_table", |b| {
        b.iter(|| {
            black_box(parse_var_descriptors(black_box(table), header.num_vars as usize).unwrap())
        });
    });

    group.bench_function("decode_tracked_values", |b| {
        b.iter(|| black_box(TrackedValues::decode(&descriptors, black_box(data)).unwrap()));
    });

    group.bench_function("parse_session_info", |b| {
        b.iter(|| black_box(SessionDetails::parse(black_box(SESSION_INFO), 0)));
    });

    group.bench_function("decode_flags", |b| {
        b.iter(|| {
            black_box(FlagStatus::from_session_flags(black_box(
                FLAG_YELLOW | FLAG_GREEN | FLAG_BLUE,
            )))
        });
    });

    group.finish();
}

fn bench_reader_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("reader");
    let (opener, handle) = MemorySegmentOpener::new();
    handle.publish(create_segment_image(1));
    let mut reader = IRacingReader::new(
        ReaderSettings::default(),
        Box::new(opener),
        Box::new(ManualProcessProbe::new(true)),
        Logger::new(RecordingSink::new(), "bench"),
    );
    // connect and parse the session block once
    reader.poll();

    group.bench_function("poll_live_tick", |b| {
        b.iter(|| black_box(reader.poll()));
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_reader_tick);
criterion_main!(benches);
