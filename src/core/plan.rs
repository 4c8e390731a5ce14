//! Purpose: Plan a logical transfer into ordered pipetting steps without
//! touching any ledger.
//! Exports: `plan_transfer`, `TransferPlan`, `PlanItem`, `PlannedStep`,
//! `PartitionBy`, `broadcast_pairs`, `partition_volume`.
//! Role: Pure planning layer used by `worklist` to apply deterministic
//! ledger mutations and record emission.
//! Invariants: No side effects; output depends only on the inputs.
//! Invariants: Split step volumes sum exactly to the requested volume and
//! never exceed the step cap.
use std::collections::BTreeMap;
use std::collections::VecDeque;

use serde::Deserialize;
use tracing::warn;

use crate::core::error::{Error, ErrorKind};
use crate::core::grid::parse_well;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PartitionBy {
    #[default]
    Auto,
    Source,
    Destination,
}

impl PartitionBy {
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "auto" => Ok(PartitionBy::Auto),
            "source" => Ok(PartitionBy::Source),
            "destination" => Ok(PartitionBy::Destination),
            other => Err(Error::new(ErrorKind::UnknownPartitionMode)
                .with_message(format!("invalid partition mode: {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedStep {
    pub source: String,
    pub destination: String,
    pub volume: f64,
    pub tip: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlanItem {
    Step(PlannedStep),
    Break,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferPlan {
    pub items: Vec<PlanItem>,
    /// Number of aspirate/dispense pairs in the plan.
    pub step_count: usize,
    /// Extra steps introduced by large-volume splitting.
    pub split_steps: usize,
}

pub struct PlanRequest<'a> {
    pub source_wells: &'a [String],
    pub destination_wells: &'a [String],
    pub volumes: &'a [f64],
    pub step_cap: f64,
    pub auto_split: bool,
    pub partition_by: PartitionBy,
    pub source_name: &'a str,
    pub destination_name: &'a str,
    pub source_is_trough: bool,
    pub destination_is_trough: bool,
    pub tips: &'a [u8],
    pub label: Option<&'a str>,
}

/// Broadcasts well/volume lists to a common length.
///
/// Single-element lists repeat to match the longest side; anything else must
/// already agree in length. Negative or non-finite volumes are rejected;
/// zero volumes survive here and are dropped during wave planning.
pub fn broadcast_pairs(
    source_wells: &[String],
    destination_wells: &[String],
    volumes: &[f64],
) -> Result<(Vec<String>, Vec<String>, Vec<f64>), Error> {
    if source_wells.is_empty() || destination_wells.is_empty() || volumes.is_empty() {
        return Err(Error::new(ErrorKind::ShapeMismatch)
            .with_message("source wells, destination wells and volumes must be non-empty"));
    }
    for volume in volumes {
        if !volume.is_finite() || *volume < 0.0 {
            return Err(Error::new(ErrorKind::InvalidVolume)
                .with_message(format!("invalid transfer volume: {volume}"))
                .with_volume(*volume));
        }
    }
    let n = source_wells
        .len()
        .max(destination_wells.len())
        .max(volumes.len());
    match (
        repeat_to(source_wells, n),
        repeat_to(destination_wells, n),
        repeat_to(volumes, n),
    ) {
        (Some(s), Some(d), Some(v)) => Ok((s, d, v)),
        _ => Err(Error::new(ErrorKind::ShapeMismatch).with_message(format!(
            "number of source/destination/volumes must be equal, got {}/{}/{}",
            source_wells.len(),
            destination_wells.len(),
            volumes.len()
        ))),
    }
}

fn repeat_to<T: Clone>(values: &[T], n: usize) -> Option<Vec<T>> {
    if values.len() == n {
        Some(values.to_vec())
    } else if values.len() == 1 {
        Some(vec![values[0].clone(); n])
    } else {
        None
    }
}

/// Resolves `Auto` partitioning and warns about inefficient explicit modes.
///
/// `Auto` groups by source columns unless the source is a shared reservoir
/// and the destination is not, which would serialize parallel tips against
/// a single physical compartment.
pub fn resolve_partition_by(
    partition_by: PartitionBy,
    source_name: &str,
    source_is_trough: bool,
    destination_name: &str,
    destination_is_trough: bool,
    label: Option<&str>,
) -> PartitionBy {
    match partition_by {
        PartitionBy::Auto => {
            if source_is_trough && !destination_is_trough {
                PartitionBy::Destination
            } else {
                PartitionBy::Source
            }
        }
        PartitionBy::Source => {
            if source_is_trough && !destination_is_trough {
                warn!(
                    source = source_name,
                    destination = destination_name,
                    label = label.unwrap_or(""),
                    "partitioning by a shared-reservoir source is potentially inefficient; \
                     consider partitioning by destination"
                );
            }
            PartitionBy::Source
        }
        PartitionBy::Destination => {
            if destination_is_trough && !source_is_trough {
                warn!(
                    source = source_name,
                    destination = destination_name,
                    label = label.unwrap_or(""),
                    "partitioning by a shared-reservoir destination is potentially inefficient; \
                     consider partitioning by source"
                );
            }
            PartitionBy::Destination
        }
    }
}

/// Splits a pipetting volume into integer-valued steps that stay below the
/// step cap. The remainder of the near-equal division lands in the final
/// step so the parts sum exactly to the input.
pub fn partition_volume(volume: f64, step_cap: f64) -> Vec<f64> {
    if volume == 0.0 {
        return Vec::new();
    }
    if volume < step_cap {
        return vec![volume];
    }
    let steps = (volume / step_cap).ceil() as usize;
    let step_volume = (volume / steps as f64).ceil();
    let mut volumes = vec![step_volume; steps - 1];
    let already: f64 = volumes.iter().sum();
    volumes.push(volume - already);
    volumes
}

/// Groups pairs into column batches and orders each batch row-round-robin
/// so no row repeats before every other row of the batch was visited.
fn partition_by_column(
    sources: &[String],
    destinations: &[String],
    volumes: &[f64],
    partition_by: PartitionBy,
) -> Result<Vec<(Vec<String>, Vec<String>, Vec<f64>)>, Error> {
    let mut groups: BTreeMap<usize, (Vec<String>, Vec<String>, Vec<f64>)> = BTreeMap::new();
    for ((s, d), v) in sources.iter().zip(destinations).zip(volumes) {
        let key_well = match partition_by {
            PartitionBy::Source => s,
            PartitionBy::Destination => d,
            PartitionBy::Auto => {
                return Err(Error::new(ErrorKind::UnknownPartitionMode)
                    .with_message("partition mode must be resolved before grouping"));
            }
        };
        let (_, column) = parse_well(key_well)?;
        let group = groups.entry(column).or_default();
        group.0.push(s.clone());
        group.1.push(d.clone());
        group.2.push(*v);
    }

    let mut batches = Vec::with_capacity(groups.len());
    for (_, (srcs, dsts, vols)) in groups {
        let keys = match partition_by {
            PartitionBy::Destination => &dsts,
            _ => &srcs,
        };
        let order = row_round_robin_order(keys)?;
        batches.push((
            order.iter().map(|&i| srcs[i].clone()).collect(),
            order.iter().map(|&i| dsts[i].clone()).collect(),
            order.iter().map(|&i| vols[i]).collect(),
        ));
    }
    Ok(batches)
}

/// Index order that cycles through the row letters of the given wells,
/// taking one well per row before revisiting a row.
fn row_round_robin_order(wells: &[String]) -> Result<Vec<usize>, Error> {
    let mut by_row: BTreeMap<char, VecDeque<usize>> = BTreeMap::new();
    for (i, well) in wells.iter().enumerate() {
        let (row, _) = parse_well(well)?;
        by_row.entry(row).or_default().push_back(i);
    }
    let mut order = Vec::with_capacity(wells.len());
    while !by_row.is_empty() {
        let rows: Vec<char> = by_row.keys().copied().collect();
        for row in rows {
            if let Some(queue) = by_row.get_mut(&row) {
                if let Some(i) = queue.pop_front() {
                    order.push(i);
                }
                if queue.is_empty() {
                    by_row.remove(&row);
                }
            }
        }
    }
    Ok(order)
}

/// Resolves a transfer request into ordered steps and break markers.
///
/// Pairs are grouped into column batches, oversized volumes are split, and
/// the split steps of one batch are synchronized into waves: wave `k`
/// includes every pair that still has a step `k`. A break separates waves
/// that touched more than one pair, and closes every batch that needed
/// splitting. Tips rotate round-robin over the requested selection, one
/// per pair position in the batch.
pub fn plan_transfer(request: &PlanRequest<'_>) -> Result<TransferPlan, Error> {
    if request.step_cap <= 0.0 || !request.step_cap.is_finite() {
        return Err(Error::new(ErrorKind::InvalidVolume)
            .with_message(format!("invalid step cap: {}", request.step_cap)));
    }
    if request.tips.is_empty() {
        return Err(Error::new(ErrorKind::InvalidTip).with_message("empty tip selection"));
    }
    let (sources, destinations, volumes) = broadcast_pairs(
        request.source_wells,
        request.destination_wells,
        request.volumes,
    )?;
    let partition_by = resolve_partition_by(
        request.partition_by,
        request.source_name,
        request.source_is_trough,
        request.destination_name,
        request.destination_is_trough,
        request.label,
    );

    let mut plan = TransferPlan::default();
    for (srcs, dsts, vols) in partition_by_column(&sources, &destinations, &volumes, partition_by)? {
        let mut step_lists = Vec::with_capacity(vols.len());
        for volume in &vols {
            if request.auto_split {
                step_lists.push(partition_volume(*volume, request.step_cap));
            } else {
                if *volume > request.step_cap {
                    return Err(Error::new(ErrorKind::InvalidVolume)
                        .with_message(format!(
                            "volume {volume} exceeds the step cap {} and splitting is disabled",
                            request.step_cap
                        ))
                        .with_volume(*volume));
                }
                step_lists.push(vec![*volume]);
            }
        }
        let waves = step_lists.iter().map(Vec::len).max().unwrap_or(0);
        plan.split_steps += step_lists
            .iter()
            .map(|steps| steps.len().saturating_sub(1))
            .sum::<usize>();

        for wave in 0..waves {
            let mut accessed = 0usize;
            for (i, ((s, d), steps)) in srcs.iter().zip(&dsts).zip(&step_lists).enumerate() {
                let Some(volume) = steps.get(wave) else {
                    continue;
                };
                if *volume <= 0.0 {
                    continue;
                }
                plan.items.push(PlanItem::Step(PlannedStep {
                    source: s.clone(),
                    destination: d.clone(),
                    volume: *volume,
                    tip: request.tips[i % request.tips.len()],
                }));
                plan.step_count += 1;
                accessed += 1;
            }
            if waves > 1 && accessed > 1 && wave != waves - 1 {
                plan.items.push(PlanItem::Break);
            }
        }
        if waves > 1 {
            plan.items.push(PlanItem::Break);
        }
    }
    Ok(plan)
}
