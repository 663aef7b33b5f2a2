//! A small three-car session shared by the integration tests.
//!
//! Cars 7 and 9 race in GT, car 12 in TCR. Every car has four valid laps.
//! Car 7 also has a 300 s lap (a drive-through) and car 12 has a glitched
//! S3b split on lap 4 that falls under the noise floor.

use apexline::pipeline::PipelineInputs;
use apexline::timing::{LapRecord, LapWindow, MicroSector, MicroSectorRecord, TelemetrySample};

pub const RACE_ID: &str = "sebring_R1";
pub const VALID_LAPS: u32 = 4;
pub const INVALID_LAP: (u32, u32) = (7, 5);
pub const SAMPLES_PER_LAP: usize = 60;

/// (car, class, base micro-sector times)
const CARS: [(u32, &str, [f64; 6]); 3] = [
    (7, "GT", [18.0, 17.0, 21.0, 20.0, 19.0, 18.0]),
    (9, "GT", [17.8, 17.2, 20.8, 20.2, 19.1, 18.1]),
    (12, "TCR", [19.0, 18.5, 22.0, 21.5, 20.0, 19.5]),
];

const THROTTLE_TRACE: [f64; 10] = [100.0, 100.0, 80.0, 55.0, 20.0, 0.0, 0.0, 30.0, 60.0, 100.0];

fn split_times(base: &[f64; 6], lap_no: u32) -> [f64; 6] {
    let mut times = *base;
    for (idx, t) in times.iter_mut().enumerate() {
        *t += 0.1 * ((lap_no as usize + idx) % 3) as f64;
    }
    times
}

fn lap_samples(driver_id: &str, car: u32, lap_no: u32) -> Vec<TelemetrySample> {
    (0..SAMPLES_PER_LAP)
        .map(|j| {
            let throttle = THROTTLE_TRACE[(j + lap_no as usize) % THROTTLE_TRACE.len()];
            let braking = throttle == 0.0;
            TelemetrySample {
                driver_id: driver_id.to_string(),
                lap_no,
                lap_progress: j as f64 / SAMPLES_PER_LAP as f64,
                throttle_pct: Some(throttle),
                brake_pressure: Some(if braking { 60.0 + car as f64 } else { 0.0 }),
                steering_angle: Some((j % 7) as f64 * 3.0 - 9.0),
                longitudinal_accel: Some(if braking { -1.2 } else { 0.3 }),
                lateral_accel: Some(((j % 5) as f64 - 2.0) * 0.5),
                speed: Some(150.0 + j as f64),
            }
        })
        .collect()
}

pub fn session_inputs() -> PipelineInputs {
    let window = LapWindow::default();
    let mut inputs = PipelineInputs::default();

    for (car, class, base) in CARS {
        let driver_id = format!("D_{}", car);
        for lap_no in 1..=VALID_LAPS {
            let mut times = split_times(&base, lap_no);
            let lap_time: f64 = times.iter().sum();
            inputs
                .laps
                .push(LapRecord::new(car, lap_no, class, RACE_ID, lap_time, &window));

            if car == 12 && lap_no == 4 {
                times[5] = 0.8;
            }
            for (sector, t) in MicroSector::ALL.iter().zip(times) {
                inputs
                    .sectors
                    .push(MicroSectorRecord::new(car, lap_no, *sector, t));
            }
            inputs.telemetry.extend(lap_samples(&driver_id, car, lap_no));
        }
    }

    let (car, lap_no) = INVALID_LAP;
    inputs
        .laps
        .push(LapRecord::new(car, lap_no, "GT", RACE_ID, 300.0, &window));
    for (sector, t) in MicroSector::ALL.iter().zip([50.0; 6]) {
        inputs
            .sectors
            .push(MicroSectorRecord::new(car, lap_no, *sector, t));
    }
    inputs.telemetry.extend(lap_samples("D_7", car, lap_no));

    // A sample past the finish line
    inputs.telemetry.push(TelemetrySample {
        driver_id: "D_9".into(),
        lap_no: 1,
        lap_progress: 1.5,
        throttle_pct: Some(100.0),
        ..Default::default()
    });

    inputs
}
