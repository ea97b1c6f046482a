use fleet_common::{InstanceRecord, MachineTemplate};

/// Turn one resolved template into `nodes` independent records named `<name>-1` ..
/// `<name>-<nodes>`. Volume names get the same suffix. Every record owns its own copy of
/// the volume list and starts without an identifier.
pub fn expand(template: &MachineTemplate, nodes: u32) -> Vec<InstanceRecord> {
    (1..=nodes)
        .map(|index| {
            let mut record = InstanceRecord::from_template(template);
            record.id = None;
            record.name = format!("{}-{}", template.name, index);
            for volume in &mut record.volumes {
                volume.name = format!("{}-{}", volume.name, index);
                // A pre-existing volume can only back one node.
                volume.id = None;
            }
            record
        })
        .collect()
}
