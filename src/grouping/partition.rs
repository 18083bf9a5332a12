//! Assignment of samples to the two comparison groups by name

use crate::error::{DeError, Result};

/// Column indices of each group, in sample order
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePartition {
    pub group_a: Vec<usize>,
    pub group_b: Vec<usize>,
    /// Samples whose name contains both identifiers or neither
    pub ambiguous: Vec<usize>,
}

impl SamplePartition {
    /// Group A columns followed by group B columns
    pub fn column_order(&self) -> Vec<usize> {
        self.group_a.iter().chain(&self.group_b).copied().collect()
    }

    /// The same partition after columns are reordered by [`column_order`](Self::column_order)
    pub fn contiguous(&self) -> Self {
        let order = self.column_order();
        let (n_a, n) = (self.group_a.len(), order.len());
        Self {
            group_a: (0..n_a).collect(),
            group_b: (n_a..n).collect(),
            ambiguous: self
                .ambiguous
                .iter()
                .filter_map(|j| order.iter().position(|o| o == j))
                .collect(),
        }
    }
}

/// A sample whose name contains `a_id` goes to group A, every other sample to
/// group B.
///
/// Names containing both identifiers land in A; names containing neither land
/// in B. Both cases are reported as ambiguous. An empty group is an error.
pub fn partition_samples<S: AsRef<str>>(sample_ids: &[S], a_id: &str, b_id: &str) -> Result<SamplePartition> {
    let mut partition = SamplePartition {
        group_a: Vec::new(),
        group_b: Vec::new(),
        ambiguous: Vec::new(),
    };
    for (j, name) in sample_ids.iter().enumerate() {
        let name = name.as_ref();
        let (in_a, in_b) = (name.contains(a_id), name.contains(b_id));
        if in_a {
            partition.group_a.push(j);
        } else {
            partition.group_b.push(j);
        }
        if in_a == in_b {
            log::warn!(
                "Sample '{}' matches {} of '{}' and '{}'; assigned to group {}",
                name,
                if in_a { "both" } else { "neither" },
                a_id,
                b_id,
                if in_a { "A" } else { "B" }
            );
            partition.ambiguous.push(j);
        }
    }

    if partition.group_a.is_empty() {
        return Err(DeError::EmptyPartition {
            identifier: a_id.to_string(),
            group: "A".to_string(),
        });
    }
    if partition.group_b.is_empty() {
        return Err(DeError::EmptyPartition {
            identifier: b_id.to_string(),
            group: "B".to_string(),
        });
    }
    Ok(partition)
}
