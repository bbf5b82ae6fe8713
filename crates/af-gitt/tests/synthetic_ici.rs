//! ICI extraction on a synthetic interrupted discharge.
//!
//! The loaded voltage drifts linearly in time and every rest relaxes as
//! `V = V_end + offset + m * sqrt(t - t_rest)`, so each rest has a known
//! equilibrium potential and the diffusivity is
//! `4/(9 pi) * (r * drift / m)^2`.

use af_core::{Error, TimeSeries};
use af_gitt::{IciOptions, extract_ici};
use approx::assert_relative_eq;
use std::f64::consts::PI;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const I_LOAD: f64 = -2e-3;
const LOAD: usize = 50;
const REST: usize = 20;
const E0: f64 = 3.9;
const DRIFT: f64 = -1e-4;
const RELAX: f64 = 2e-3;
const OFFSET: f64 = 0.01;
const RADIUS: f64 = 1.8e-6;

#[derive(Default)]
struct Record {
    current: Vec<f64>,
    voltage: Vec<f64>,
    /// Time of the last loaded sample of each step.
    load_ends: Vec<f64>,
}

impl Record {
    fn now(&self) -> f64 {
        self.current.len() as f64
    }

    fn load(&mut self, samples: usize, current: f64) {
        for _ in 0..samples {
            let t = self.now();
            self.current.push(current);
            self.voltage.push(E0 + DRIFT * t);
        }
        self.load_ends.push(self.now() - 1.0);
    }

    fn rest(&mut self, samples: usize) {
        let t_end = self.now() - 1.0;
        let t0 = self.now();
        for _ in 0..samples {
            let t = self.now();
            self.current.push(0.0);
            self.voltage.push(E0 + DRIFT * t_end + OFFSET + RELAX * (t - t0).sqrt());
        }
    }

    fn series(self) -> TimeSeries {
        let time = (0..self.current.len()).map(|i| i as f64).collect();
        TimeSeries::new(time, self.current, self.voltage, 298.15, false).unwrap()
    }
}

/// Initial rest, then `n_steps` x (load, rest); the final rest has `last_rest` samples.
fn interrupted_discharge(n_steps: usize, last_rest: usize) -> Record {
    let mut r = Record::default();
    for _ in 0..5 {
        r.current.push(0.0);
        r.voltage.push(E0);
    }
    for k in 0..n_steps {
        r.load(LOAD, I_LOAD);
        r.rest(if k + 1 == n_steps { last_rest } else { REST });
    }
    r
}

fn expected_ds() -> f64 {
    4.0 / (9.0 * PI) * (RADIUS * DRIFT / RELAX).powi(2)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_recovers_equilibrium_potential_and_diffusivity() {
    let record = interrupted_discharge(6, REST);
    let load_ends = record.load_ends.clone();
    let params = extract_ici(&record.series(), RADIUS, &IciOptions::default()).unwrap();

    assert_eq!(params.len(), 6);
    for k in 0..6 {
        assert_eq!(params.time[k], load_ends[k]);
        assert_eq!(params.current[k], I_LOAD);
        assert_relative_eq!(params.eeq[k], E0 + DRIFT * load_ends[k] + OFFSET, epsilon = 1e-10);
        assert_relative_eq!(params.dudrt[k], RELAX, max_relative = 1e-8);
        assert!(params.dudrt_err[k] < 1e-8 && params.eeq_err[k] < 1e-8);
        assert_relative_eq!(params.de_dt[k], DRIFT, max_relative = 1e-9);
        assert_relative_eq!(params.ds[k], expected_ds(), max_relative = 1e-6);
    }

    let keys: Vec<&str> = params.to_map().keys().copied().collect();
    assert_eq!(keys, ["Ds", "Eeq", "Eeq_err", "dEdt", "dUdrt", "dUdrt_err"]);
}

#[test]
fn test_trailing_load_is_dropped() {
    let mut record = interrupted_discharge(4, REST);
    record.load(10, I_LOAD);
    let params = extract_ici(&record.series(), RADIUS, &IciOptions::default()).unwrap();
    assert_eq!(params.len(), 4);
    assert!(params.ds.iter().all(|d| d.is_finite()));
}

#[test]
fn test_single_sample_final_rest_is_undefined() {
    let record = interrupted_discharge(5, 1);
    let params = extract_ici(&record.series(), RADIUS, &IciOptions::default()).unwrap();
    assert_eq!(params.len(), 5);
    assert!(params.eeq[4].is_nan());
    assert!(params.ds[4].is_nan());
    assert!(params.eeq[..4].iter().all(|e| e.is_finite()));
    assert!(params.ds[..4].iter().all(|d| d.is_finite()));
}

#[test]
fn test_fit_window_follows_options() {
    // relaxation only sqrt-shaped after 5 s; a window starting there still recovers it
    let mut record = interrupted_discharge(3, REST);
    let n = record.voltage.len();
    for j in (n - REST)..(n - REST + 5) {
        record.voltage[j] += 0.05;
    }
    let options = IciOptions { tmin: 5.0, tmax: 15.0 };
    let params = extract_ici(&record.series(), RADIUS, &options).unwrap();
    assert_relative_eq!(params.dudrt[2], RELAX, max_relative = 1e-8);
}

#[test]
fn test_mixed_direction_rejected() {
    let mut record = interrupted_discharge(3, REST);
    record.current[5] = -I_LOAD;
    let err = extract_ici(&record.series(), RADIUS, &IciOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");
}

#[test]
fn test_invalid_inputs_rejected() {
    let series = interrupted_discharge(2, REST).series();
    let bad = IciOptions { tmin: 10.0, tmax: 1.0 };
    assert!(matches!(extract_ici(&series, RADIUS, &bad), Err(Error::Config(_))));
    assert!(matches!(
        extract_ici(&series, 0.0, &IciOptions::default()),
        Err(Error::Validation(_))
    ));

    let resting = TimeSeries::new(vec![0.0, 1.0, 2.0], vec![0.0; 3], vec![E0; 3], 298.15, false)
        .unwrap();
    assert!(matches!(
        extract_ici(&resting, RADIUS, &IciOptions::default()),
        Err(Error::Validation(_))
    ));
}
