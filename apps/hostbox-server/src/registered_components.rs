// Component factory crates linked into the host so their inventory
// registrations are collected by `FactoryRegistry::discover()`.
// Add new factory crates here.
#![allow(unused_imports)]

use heartbeat as _;
