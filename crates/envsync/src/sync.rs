// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Decide whether installed distributions already satisfy a set of
//! requirements.

use url::Url;

use crate::requirement::{DirectReference, Requirement};
use crate::snapshot::{Distribution, DistributionSnapshot, Origin};

#[cfg(test)]
#[path = "./sync_test.rs"]
mod sync_test;

/// True if every requirement is satisfied by `snapshot`.
pub fn in_sync(requirements: &[Requirement], snapshot: &DistributionSnapshot) -> bool {
    out_of_sync(requirements, snapshot).is_none()
}

/// The first requirement that `snapshot` does not satisfy, if any.
pub fn out_of_sync<'a>(
    requirements: &'a [Requirement],
    snapshot: &DistributionSnapshot,
) -> Option<&'a Requirement> {
    requirements.iter().find(|req| {
        let satisfied = is_satisfied(req, snapshot);
        if !satisfied {
            tracing::debug!(requirement = %req, "requirement is not satisfied");
        }
        !satisfied
    })
}

/// Check one requirement against the snapshot.
pub fn is_satisfied(requirement: &Requirement, snapshot: &DistributionSnapshot) -> bool {
    if !requirement.applies_to(snapshot.environment()) {
        return true;
    }
    let Some(dist) = snapshot.get(requirement.name().as_str()) else {
        return false;
    };
    if !requirement.extras().is_subset(&dist.extras) {
        return false;
    }
    if !requirement.specifier().contains(&dist.version) {
        return false;
    }
    match requirement.source() {
        None => true,
        Some(source) => source_matches(source, requirement.editable(), dist),
    }
}

fn source_matches(source: &DirectReference, editable: bool, dist: &Distribution) -> bool {
    match (source, &dist.origin) {
        (
            DirectReference::Vcs(wanted),
            Origin::Vcs {
                vcs,
                url,
                commit_id,
                requested_revision,
            },
        ) => {
            wanted.vcs == *vcs
                && same_url(&wanted.url, url)
                && wanted.revision.as_ref().is_none_or(|rev| {
                    rev == commit_id || requested_revision.as_ref() == Some(rev)
                })
        }
        (
            DirectReference::Url(wanted),
            Origin::Directory {
                url,
                editable: installed_editable,
            },
        ) => editable == *installed_editable && same_url(wanted, url),
        (DirectReference::Url(wanted), Origin::Url { url }) => !editable && same_url(wanted, url),
        _ => false,
    }
}

/// Compare urls ignoring fragments, which installers never record.
fn same_url(a: &Url, b: &Url) -> bool {
    let bare = |url: &Url| {
        let mut url = url.clone();
        url.set_fragment(None);
        url.as_str().trim_end_matches('/').to_string()
    };
    bare(a) == bare(b)
}
