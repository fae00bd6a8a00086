// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The max-nodes query.
//!
//! Answers "how many nodes could this job ever get", together with the
//! reason code identifying the winning limit. QoS fields merge across the
//! pair (the primary's value wins; an unlimited primary adopts the
//! secondary's), and association overrides are consulted only for fields no
//! QoS constrained. The first group-node cap hit in the association walk
//! wins and ends the walk.

use crate::job::JobRecord;
use crate::precedence::QosPair;
use crate::reason::ReasonCode;
use crate::tables::{AssocTable, QosTable};
use acctpol_config::Limit;

/// The tightest node-count cap applicable to `job`. `reason` receives the
/// code of the limit that produced the answer, or stays untouched when no
/// cap applies.
pub(crate) fn get_max_nodes(
    qos_table: &QosTable,
    assocs: &AssocTable,
    pair: QosPair,
    job: &JobRecord,
    reason: &mut ReasonCode,
) -> Limit {
    let mut qos_max_nodes_pj = Limit::Unlimited;
    let mut qos_max_nodes_pu = Limit::Unlimited;
    let mut qos_grp_nodes = Limit::Unlimited;
    for qos_id in pair.iter() {
        let Some(qos) = qos_table.get(qos_id) else {
            continue;
        };
        qos_max_nodes_pj = qos_max_nodes_pj.or(qos.limits.max_nodes_pj);
        qos_max_nodes_pu = qos_max_nodes_pu.or(qos.limits.max_nodes_pu);
        qos_grp_nodes = qos_grp_nodes.or(qos.limits.grp_nodes);
    }

    let mut max_nodes = Limit::Unlimited;

    if qos_max_nodes_pj.tighter_than(qos_max_nodes_pu) {
        max_nodes = qos_max_nodes_pj;
        *reason = ReasonCode::WaitQosMaxNodePerJob;
    } else if qos_max_nodes_pu.is_finite() {
        max_nodes = qos_max_nodes_pu;
        *reason = ReasonCode::WaitQosMaxNodePerUser;
    }

    if qos_grp_nodes.tighter_than(max_nodes) {
        max_nodes = qos_grp_nodes;
        *reason = ReasonCode::WaitQosGrpNode;
    }

    let Some(assoc_id) = job.assoc else {
        return max_nodes;
    };
    for (depth, id) in assocs.chain_to_root(assoc_id).into_iter().enumerate() {
        let Some(assoc) = assocs.get(id) else { continue };

        if depth == 0
            && qos_max_nodes_pj.is_unlimited()
            && qos_max_nodes_pu.is_unlimited()
            && assoc.effective.max_nodes_pj().tighter_than(max_nodes)
        {
            max_nodes = assoc.effective.max_nodes_pj();
            *reason = ReasonCode::WaitAssocMaxNodePerJob;
        }

        if qos_grp_nodes.is_unlimited() {
            if let Some(cap) = assoc.effective.grp_nodes().finite() {
                if Limit::At(cap).tighter_than(max_nodes) {
                    max_nodes = Limit::At(cap);
                    *reason = ReasonCode::WaitAssocGrpNode;
                }
                break;
            }
        }
    }

    max_nodes
}
