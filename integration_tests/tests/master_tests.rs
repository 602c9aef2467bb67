//! Full-stack master scenarios: TOML config in, frames on the simulated bus out

use std::sync::Arc;

use ferrocan_common::{
    messages::{CanFrame, CanId, EmcyMessage},
    traits::BusState,
    NodeId,
};
use ferrocan_master::{Master, MasterConfig, Severity};
use integration_tests::sim_bus::SimBus;

const NODE_ID: u8 = 5;

const CONFIG: &str = r#"
[bus]
device = "sim"
sync_interval = 1
heartbeat_interval = 2
master_node_id = 127

[[nodes]]
id = 5
name = "drive"
nr_of_tx_pdo = 1

[[nodes.objects]]
index = 0x1800
sub = 0
type = "u8"
value = 5
desc = "TPDO1 com max sub"

[[nodes.objects]]
index = 0x1800
sub = 1
type = "u32"
value = 0x181
node_id_offset = true
desc = "TPDO1 COB-ID"

[[nodes.objects]]
index = 0x1800
sub = 2
type = "u8"
value = 1
desc = "TPDO1 transmission type"

[[nodes.objects]]
index = 0x1A00
sub = 0
type = "u8"
value = 2

[[nodes.objects]]
index = 0x1A00
sub = 1
type = "u32"
value = 0x20000110

[[nodes.objects]]
index = 0x1A00
sub = 2
type = "u32"
value = 0x20000210

[[nodes.objects]]
index = 0x2000
sub = 1
type = "u16"
desc = "actual speed"

[[nodes.objects]]
index = 0x2000
sub = 2
type = "u16"
desc = "actual torque"
"#;

fn setup() -> (Master, Arc<SimBus>) {
    let bus = Arc::new(SimBus::new());
    let config = MasterConfig::load_from_str(CONFIG).unwrap();
    let master = Master::from_config(&config, bus.clone()).unwrap();
    (master, bus)
}

fn node_id() -> NodeId {
    NodeId::new(NODE_ID).unwrap()
}

#[test]
fn test_init_starts_node_and_programs_pdo() {
    let (mut master, bus) = setup();

    master.init().unwrap();

    // NMT start for the node went out
    let nmt: Vec<CanFrame> = bus.take_sent_with_id(CanId::Std(0));
    assert_eq!(nmt.len(), 1);
    assert_eq!(nmt[0].data(), &[1, NODE_ID]);

    // The PDO descriptor was programmed with the node-relative COB-ID
    let storage = master.storage(node_id()).unwrap();
    assert_eq!(
        storage.get::<u32>(0x1800, 1).unwrap(),
        0x181 + NODE_ID as u32
    );
}

#[test]
fn test_config_driven_pdo_reception() {
    let (mut master, bus) = setup();
    master.init().unwrap();

    bus.inject(CanFrame::new(
        CanId::Std(0x181 + NODE_ID as u16),
        &[0x10, 0x27, 0x05, 0x00],
    ));
    let status = master.run_cycle();
    assert!(status.bounded(Severity::Warn));

    let storage = master.storage(node_id()).unwrap();
    assert_eq!(storage.get::<u16>(0x2000, 1).unwrap(), 10000);
    assert_eq!(storage.get::<u16>(0x2000, 2).unwrap(), 5);
}

#[test]
fn test_sync_and_heartbeat_pacing() {
    let (mut master, bus) = setup();
    master.init().unwrap();
    bus.take_sent();

    // sync_interval = 1: one SYNC per cycle. heartbeat_interval = 2: one frame per two cycles.
    master.run_cycle();
    master.run_cycle();

    let syncs = bus.take_sent_with_id(CanId::Std(0x80));
    assert_eq!(syncs.len(), 2);
    assert_eq!(syncs[0].dlc, 0);

    master.run_cycle();
    master.run_cycle();
    let heartbeats = bus.take_sent_with_id(CanId::Std(0x700 | 127));
    assert_eq!(heartbeats.len(), 1);
}

#[test]
fn test_init_failure_unwinds_and_reports() {
    let (mut master, bus) = setup();

    bus.set_fail_send(true);
    let err = master.init().unwrap_err();
    assert!(err.reason.contains("NMT start failed"));

    // The frontier stopped at the node group: driver, SYNC and EMCY below it stay counted
    assert_eq!(master.stack().run_end(), Some(3));

    // Cycles on the partial stack stay clean
    let status = master.run_cycle();
    assert!(status.bounded(Severity::Warn));

    // Shutdown after a failed init is safe, and a later init succeeds
    master.shutdown().unwrap();
    bus.set_fail_send(false);
    master.init().unwrap();
    assert_eq!(master.stack().run_end(), Some(5));
}

#[test]
fn test_init_is_idempotent() {
    let (mut master, _bus) = setup();
    master.init().unwrap();
    master.init().unwrap();
    master.shutdown().unwrap();
    master.shutdown().unwrap();
}

#[test]
fn test_emcy_escalates_and_clears() {
    let (mut master, bus) = setup();
    master.init().unwrap();

    let emcy = EmcyMessage {
        node: NODE_ID,
        code: 0x1000,
        register: 0x81,
        vendor: [0; 5],
    };
    bus.inject(emcy.into());

    let status = master.run_cycle();
    assert_eq!(status.severity(), Severity::Warn);
    assert!(status.reason().contains("EMCY 1000"));

    let report = master.diag();
    assert!(report
        .values()
        .iter()
        .any(|(k, v)| k == "node5_emcy" && v == "1000"));

    // Error reset clears the condition without escalating
    let reset = EmcyMessage {
        node: NODE_ID,
        code: 0,
        register: 0,
        vendor: [0; 5],
    };
    bus.inject(reset.into());
    let status = master.run_cycle();
    assert_eq!(status.severity(), Severity::Ok);
    let report = master.diag();
    assert!(report
        .values()
        .iter()
        .any(|(k, v)| k == "node5_emcy" && v == "none"));
}

#[test]
fn test_bus_off_faults_the_cycle_and_recover_restores() {
    let (mut master, bus) = setup();
    master.init().unwrap();

    bus.set_state(BusState::BusOff);
    let status = master.run_cycle();
    assert_eq!(status.severity(), Severity::Error);
    assert!(status.reason().contains("bus-off"));

    // Fault contained: the node was commanded to stop
    let nmt = bus.take_sent_with_id(CanId::Std(0));
    assert!(nmt.iter().any(|f| f.data() == [2, NODE_ID]));

    bus.set_state(BusState::Active);
    master.recover().unwrap();

    // Recover restarted the node
    let nmt = bus.take_sent_with_id(CanId::Std(0));
    assert!(nmt.iter().any(|f| f.data() == [1, NODE_ID]));

    let status = master.run_cycle();
    assert!(status.bounded(Severity::Warn));
}

#[test]
fn test_shutdown_sends_preop_and_stops_traffic() {
    let (mut master, bus) = setup();
    master.init().unwrap();
    bus.take_sent();

    master.shutdown().unwrap();
    let nmt = bus.take_sent_with_id(CanId::Std(0));
    assert!(nmt.iter().any(|f| f.data() == [128, NODE_ID]));

    // The frontier is reset: cycles are no-ops and nothing reaches the wire
    master.run_cycle();
    master.run_cycle();
    assert!(bus.take_sent().is_empty());
}

#[test]
fn test_diag_reports_registered_entries() {
    let (mut master, _bus) = setup();
    master.init().unwrap();

    master.add_diag_entry(node_id(), 0x1800, 2, true).unwrap();
    let report = master.diag();

    // Layer rows come first, then the storage readers
    assert!(report
        .values()
        .iter()
        .any(|(k, v)| k == "bus_state" && v == "Active"));
    assert!(report
        .values()
        .iter()
        .any(|(k, v)| k == "TPDO1 transmission type" && v == "1"));
}

#[test]
fn test_rpdo_timeout_surfaces_in_cycle_status() {
    let (mut master, _bus) = setup();
    master.init().unwrap();

    // No frames from the node: transmission type 1 warns on the fourth cycle
    for _ in 0..3 {
        let status = master.run_cycle();
        assert!(status.bounded(Severity::Ok), "{}", status.reason());
    }
    let status = master.run_cycle();
    assert_eq!(status.severity(), Severity::Warn);
    assert!(status.reason().contains("RPDO timeout"));
}
