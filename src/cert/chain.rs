use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::errors::{PdfSignError, PdfSignErrorKind};

use super::{name::DistinguishedName, ChainMember};

/// Diagnostics for an already ordered chain.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ChainValidation {
    pub valid: bool,
    pub has_root: bool,
    pub is_complete: bool,
    pub length: usize,
}

struct Link<'a> {
    subject: &'a DistinguishedName,
    issuer: &'a DistinguishedName,
}

impl Link<'_> {
    fn is_selfsigned(self: &Self) -> bool {
        self.subject == self.issuer
    }
}

fn links<T: ChainMember>(certs: &[T]) -> Result<Vec<Link<'_>>, PdfSignError> {
    let mut names = HashSet::new();
    let mut links = Vec::with_capacity(certs.len());

    for (i, cert) in certs.iter().enumerate() {
        let (subject, issuer, name) = match (cert.subject(), cert.issuer(), cert.name()) {
            (Some(subject), Some(issuer), Some(name)) => (subject, issuer, name),
            _ => {
                return Err(PdfSignError {
                    kind: PdfSignErrorKind::InvalidStructure,
                    message: format!("certificate #{} lacks subject, issuer or name", i),
                })
            }
        };

        if !names.insert(name) {
            return Err(PdfSignError {
                kind: PdfSignErrorKind::DuplicateNames,
                message: name.to_owned(),
            });
        }

        links.push(Link { subject, issuer });
    }

    Ok(links)
}

/// Orders an unordered certificate set leaf first, root last.
///
/// The leaf is the certificate whose subject issues nothing else in the set.
/// From there each step picks the certificate whose subject is the current
/// issuer, stopping at a self-signed root. When the set does not link into a
/// single chain it is returned as given.
pub fn order_certificates<T: ChainMember>(certs: Vec<T>) -> Result<Vec<T>, PdfSignError> {
    if certs.is_empty() {
        return Err(PdfSignError {
            kind: PdfSignErrorKind::EmptyChain,
            message: String::new(),
        });
    }

    let order = {
        let links = links(&certs)?;
        chain_order(&links)
    };

    let order = match order {
        Some(order) => order,
        None => {
            debug!(len = certs.len(), "certificate set does not form a chain, keeping input order");
            return Ok(certs);
        }
    };

    let mut slots: Vec<Option<T>> = certs.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

fn chain_order(links: &[Link]) -> Option<Vec<usize>> {
    let issues_other = |i: usize| {
        links
            .iter()
            .enumerate()
            .any(|(j, other)| j != i && other.issuer == links[i].subject)
    };

    // prefer a real end-entity over a lone self-signed certificate
    let candidates: Vec<usize> = (0..links.len()).filter(|i| !issues_other(*i)).collect();
    let leaf = candidates
        .iter()
        .copied()
        .find(|i| !links[*i].is_selfsigned())
        .or_else(|| candidates.first().copied())?;

    let mut order = vec![leaf];
    let mut placed = vec![false; links.len()];
    placed[leaf] = true;

    let mut current = leaf;
    while !links[current].is_selfsigned() {
        let issuer = links[current].issuer;
        let next = (0..links.len()).find(|j| !placed[*j] && links[*j].subject == issuer);
        match next {
            Some(j) => {
                placed[j] = true;
                order.push(j);
                current = j;
            }
            None => break,
        }
    }

    if order.len() == links.len() {
        Some(order)
    } else {
        None
    }
}

/// Checks an ordered chain without reordering it.
pub fn validate_chain<T: ChainMember>(chain: &[T]) -> ChainValidation {
    let links = match links(chain) {
        Ok(links) => links,
        Err(_) => {
            return ChainValidation {
                length: chain.len(),
                ..Default::default()
            }
        }
    };

    let is_complete = !links.is_empty()
        && links
            .windows(2)
            .all(|pair| pair[0].issuer == pair[1].subject);
    let has_root = links.last().map(Link::is_selfsigned).unwrap_or(false);

    ChainValidation {
        valid: is_complete,
        has_root,
        is_complete,
        length: chain.len(),
    }
}
