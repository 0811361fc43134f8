use std::io::Write;

use aqm_core::{
    cells::{Cell, Egress, Ingress, JsonControlInterface, StdPacket},
    config::{load, PiCellBuildConfig},
    qdisc::queue::QueueSizeUnit,
};
use bandwidth::Bandwidth;

#[test_log::test(tokio::test(start_paused = true))]
async fn cell_from_toml() -> anyhow::Result<()> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    writeln!(
        file,
        r#"
bandwidth = "8Mbps"

[queue_disc]
mode = "packets"
queue_limit = 2
"#
    )?;
    let config: PiCellBuildConfig = load(file.path())?;
    assert_eq!(config.bandwidth, Some(Bandwidth::from_mbps(8)));
    assert_eq!(config.queue_disc.mode, QueueSizeUnit::Packets);

    let mut cell = config.into_cell::<StdPacket>()?;
    let sender = cell.sender();
    for _ in 0..3 {
        sender.enqueue(StdPacket::with_l3_length(500))?;
    }
    let egress = cell.receiver();
    assert!(egress.dequeue().await.is_some());
    assert_eq!(egress.queue_disc().stats().forced_drops, 1);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn json_control() -> anyhow::Result<()> {
    let cell = PiCellBuildConfig::default().into_cell::<StdPacket>()?;
    let control = cell.control_interface();
    control.config_cell(serde_json::json!({ "bandwidth": "1Mbps" }))?;
    assert!(control.config_cell(serde_json::json!({})).is_err());
    assert!(control
        .config_cell(serde_json::json!({ "bandwidth": "fast" }))
        .is_err());
    Ok(())
}
