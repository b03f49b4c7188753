//! Switch resource pool.
//!
//! Assigns the switch rule identifiers of a flow-pair once, at creation: a
//! cookie shared by both directions (distinguished by a direction flag), and
//! one meter and one transit vlan per direction. Identifiers return to the
//! pool when the flow-pair is deleted or its creation is rolled back.
//!
//! A delete releases the identifiers as soon as the flow-pair leaves the
//! cache, not when the speaker confirms the removal of its rules. Until that
//! confirmation a flow created in between may be handed the same cookie,
//! meters and transit vlans while the old rules are still on the switches.
//! The removal stays tracked under the deleted flow's id, so its confirmation
//! never moves the new owner of the identifiers.
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, PoisonError},
};

use dashmap::DashMap;
#[cfg(feature = "flowmgr_tracing")]
use tracing::{debug, warn};

use crate::orchestration::{
    error::OrchestrationError,
    infrastructure::flow::{FlowId, FlowPair},
};

pub const FORWARD_FLOW_COOKIE_MASK: u64 = 0x4000_0000_0000_0000;
pub const REVERSE_FLOW_COOKIE_MASK: u64 = 0x2000_0000_0000_0000;
pub const MIN_METER_ID: u64 = 11;
pub const MAX_METER_ID: u64 = 4095;
pub const MIN_TRANSIT_VLAN: u64 = 2;
pub const MAX_TRANSIT_VLAN: u64 = 4094;
pub const MIN_COOKIE_ID: u64 = 1;
pub const MAX_COOKIE_ID: u64 = 0x1FFF_FFFF_FFFF_FFFF;

/// Identifiers assigned to one flow-pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowResources {
    pub cookie_id: u64,
    pub forward_meter_id: u32,
    pub reverse_meter_id: u32,
    pub forward_transit_vlan: u16,
    pub reverse_transit_vlan: u16,
}

impl FlowResources {
    pub fn forward_cookie(&self) -> u64 {
        FORWARD_FLOW_COOKIE_MASK | self.cookie_id
    }

    pub fn reverse_cookie(&self) -> u64 {
        REVERSE_FLOW_COOKIE_MASK | self.cookie_id
    }

    /// Stamps the identifiers on both directions.
    pub fn assign(&self, pair: &mut FlowPair) {
        pair.forward.cookie = self.forward_cookie();
        pair.forward.meter_id = self.forward_meter_id;
        pair.forward.transit_vlan = self.forward_transit_vlan;
        pair.reverse.cookie = self.reverse_cookie();
        pair.reverse.meter_id = self.reverse_meter_id;
        pair.reverse.transit_vlan = self.reverse_transit_vlan;
    }
}

/// Range of identifiers handing out the lowest free one.
#[derive(Debug)]
struct IdPool {
    max: u64,
    next: u64,
    released: BTreeSet<u64>,
}

impl IdPool {
    fn new(min: u64, max: u64) -> Self {
        Self { max, next: min, released: BTreeSet::new() }
    }

    fn allocate(&mut self) -> Option<u64> {
        if let Some(id) = self.released.pop_first() {
            return Some(id);
        }
        if self.next > self.max {
            return None;
        }
        self.next += 1;
        Some(self.next - 1)
    }

    fn release(&mut self, id: u64) {
        if id < self.next {
            self.released.insert(id);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourcePool {
    cookies: Arc<Mutex<IdPool>>,
    meters: Arc<Mutex<IdPool>>,
    vlans: Arc<Mutex<IdPool>>,
    allocations: Arc<DashMap<FlowId, FlowResources>>,
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new(MAX_METER_ID, MAX_TRANSIT_VLAN)
    }
}

impl ResourcePool {
    /// Creates a pool whose meter and transit vlan ranges end at the given bounds.
    pub fn new(max_meter_id: u64, max_transit_vlan: u64) -> Self {
        Self {
            cookies: Arc::new(Mutex::new(IdPool::new(MIN_COOKIE_ID, MAX_COOKIE_ID))),
            meters: Arc::new(Mutex::new(IdPool::new(MIN_METER_ID, max_meter_id))),
            vlans: Arc::new(Mutex::new(IdPool::new(MIN_TRANSIT_VLAN, max_transit_vlan))),
            allocations: Arc::new(DashMap::new()),
        }
    }

    /// Assigns identifiers to a new flow-pair.
    ///
    /// Nothing stays reserved when any of the ranges is exhausted.
    pub fn allocate(&self, flow_id: &str) -> Result<FlowResources, OrchestrationError> {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        let mut meters = self.meters.lock().unwrap_or_else(PoisonError::into_inner);
        let mut vlans = self.vlans.lock().unwrap_or_else(PoisonError::into_inner);

        let cookie_id = cookies.allocate();
        let forward_meter_id = meters.allocate();
        let reverse_meter_id = meters.allocate();
        let forward_transit_vlan = vlans.allocate();
        let reverse_transit_vlan = vlans.allocate();

        match (cookie_id, forward_meter_id, reverse_meter_id, forward_transit_vlan, reverse_transit_vlan)
        {
            (Some(cookie_id), Some(forward_meter), Some(reverse_meter), Some(forward_vlan), Some(reverse_vlan)) => {
                let resources = FlowResources {
                    cookie_id,
                    forward_meter_id: forward_meter as u32,
                    reverse_meter_id: reverse_meter as u32,
                    forward_transit_vlan: forward_vlan as u16,
                    reverse_transit_vlan: reverse_vlan as u16,
                };
                self.allocations.insert(flow_id.to_string(), resources);
                #[cfg(feature = "flowmgr_tracing")]
                debug!("[resources] Allocate: flow_id: {}, resources: {:?}", flow_id, resources);
                Ok(resources)
            }
            (cookie_id, forward_meter, reverse_meter, forward_vlan, reverse_vlan) => {
                cookie_id.into_iter().for_each(|id| cookies.release(id));
                forward_meter.into_iter().chain(reverse_meter).for_each(|id| meters.release(id));
                forward_vlan.into_iter().chain(reverse_vlan).for_each(|id| vlans.release(id));
                #[cfg(feature = "flowmgr_tracing")]
                warn!("[resources] Allocate: resources exhausted for flow_id: {}", flow_id);
                Err(OrchestrationError::ResourcesExhausted(flow_id.to_string()))
            }
        }
    }

    /// Returns the identifiers of a flow-pair to the pool.
    pub fn release(&self, flow_id: &str) -> Option<FlowResources> {
        let (_, resources) = self.allocations.remove(flow_id)?;
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner).release(resources.cookie_id);
        let mut meters = self.meters.lock().unwrap_or_else(PoisonError::into_inner);
        meters.release(resources.forward_meter_id as u64);
        meters.release(resources.reverse_meter_id as u64);
        drop(meters);
        let mut vlans = self.vlans.lock().unwrap_or_else(PoisonError::into_inner);
        vlans.release(resources.forward_transit_vlan as u64);
        vlans.release(resources.reverse_transit_vlan as u64);
        #[cfg(feature = "flowmgr_tracing")]
        debug!("[resources] Release: flow_id: {}", flow_id);
        Some(resources)
    }

    pub fn get(&self, flow_id: &str) -> Option<FlowResources> {
        self.allocations.get(flow_id).map(|resources| *resources)
    }
}
