//! Unit test modules.

mod deltas_test;
mod ideal_lap_test;
mod physics_reference_test;
