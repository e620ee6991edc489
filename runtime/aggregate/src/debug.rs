//! Read-only textual status listings for diagnostics.
//!
//! One listing per aggregate device: the device itself with its bound
//! state, then every match entry with the matched component's identity and
//! state. Purely informational; reflects the state at the time of the call.

use alloc::format;
use alloc::string::String;
use core::fmt::Write;

use crate::device::{AggregateId, BindState};
use crate::registry::RegistryInner;

pub(crate) fn format_aggregate(inner: &RegistryInner, id: AggregateId) -> Option<String> {
    let adev = inner.aggregate_get(id)?;
    let mut out = String::new();

    let _ = writeln!(out, "{:<40} {:>20}", "aggregate_device name", "status");
    let _ = writeln!(out, "{:-<61}", "");
    let name = format!("aggregate{} ({})", adev.id.0, adev.parent);
    let status = if adev.state == BindState::Bound {
        "bound"
    } else {
        "not bound"
    };
    let _ = writeln!(out, "{:<40} {:>20}", name, status);
    let _ = writeln!(out);

    let _ = writeln!(out, "{:<40} {:>20}", "device name", "status");
    let _ = writeln!(out, "{:-<61}", "");
    for entry in adev.match_list.entries() {
        let component = entry.component.and_then(|cid| inner.component_get(cid));
        let (name, status) = match component {
            Some(c) => (
                format!("{}", c.dev),
                if c.bound { "bound" } else { "not bound" },
            ),
            None => (String::from("(unknown)"), "not registered"),
        };
        let _ = writeln!(out, "{:<40} {:>20}", name, status);
    }

    Some(out)
}
