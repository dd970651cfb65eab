#![cfg(all(feature = "serialport", feature = "report"))]

use amplyze_lib::acquisition::{AcquisitionFacade, Session};
use amplyze_lib::protocol::{Snapshot, PF_NOMINAL, SAFETY_NOMINAL};
use amplyze_lib::report::{self, chart, ReportLayout, Verdict};
use amplyze_lib::serialport::SerialSettings;
use amplyze_lib::simulator::SimulatedSource;
use chrono::NaiveDate;
use std::path::Path;

const FIRMWARE_LINE: &str = r#"{"PackVoltage_mV":15200,"Current_mA":120,"Temperature_C":25,"CycleCount":42,"SafetyStatus":0,"PF_Status":0,"GaugeType":"BQ27545","Cells":[3800,3820,3790,3810],"RemainCapacity_mAh":1500,"FullCapacity_mAh":2500}"#;

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn firmware_line_to_pdf() {
    let snapshot = Snapshot::from_line(FIRMWARE_LINE).unwrap();
    assert_eq!(snapshot.safety_status_text(), SAFETY_NOMINAL);
    assert_eq!(snapshot.pf_status_text(), PF_NOMINAL);

    let generated_at = NaiveDate::from_ymd_opt(2026, 10, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    let layout = ReportLayout::build(&snapshot, generated_at);
    assert_eq!(layout.verdict, Verdict::Pass);
    assert_eq!(
        layout.statistics_caption().unwrap(),
        "Statistics: Min: 3790mV | Max: 3820mV | Delta: 30mV | Avg: 3805mV"
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("report.pdf");
    report::try_compose(&snapshot, &destination, None).unwrap();

    assert_eq!(files_in(dir.path()), vec!["report.pdf".to_string()]);
    let document = lopdf::Document::load(&destination).unwrap();
    assert_eq!(document.get_pages().len(), 1);
}

#[test]
fn simulated_session_report() {
    let facade =
        AcquisitionFacade::with_simulator(SerialSettings::default(), SimulatedSource::with_seed(7));
    let mut session = Session::new(facade);
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("simulated.pdf");

    assert!(!session.save_report(&destination, None));
    assert!(!destination.exists());

    let snapshot = session.read(true).unwrap().clone();
    assert_eq!(snapshot.cells().len(), 4);
    assert_eq!(session.last_snapshot(), Some(&snapshot));

    assert!(session.save_report(&destination, None));
    assert_eq!(files_in(dir.path()), vec!["simulated.pdf".to_string()]);
    let bytes = std::fs::read(&destination).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[test]
fn hardware_read_without_connection_keeps_last_snapshot() {
    let mut session = Session::default();
    session.read(true).unwrap();
    let before = session.last_snapshot().cloned();

    assert!(session.read(false).is_err());
    assert_eq!(session.last_snapshot().cloned(), before);
}

#[test]
fn report_without_cells_has_no_chart() {
    let snapshot = Snapshot::from_line(r#"{"PackVoltage_mV":15000,"SafetyStatus":2}"#).unwrap();
    assert!(snapshot.cells().is_empty());
    assert!(!chart::render(snapshot.cells(), Path::new("unused.png")));

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("nocells.pdf");
    assert!(report::compose(&snapshot, &destination, None));
    assert_eq!(files_in(dir.path()), vec!["nocells.pdf".to_string()]);
    assert_eq!(
        ReportLayout::build(&snapshot, chrono::Local::now().naive_local()).verdict,
        Verdict::Attention
    );
}
