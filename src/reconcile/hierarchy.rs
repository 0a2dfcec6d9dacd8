//! Tree-shaped entities stored as flat rows.
//!
//! A contained entity records its parent's logical key (or `TopLevel`)
//! instead of holding the parent. Trees are flattened breadth-first before
//! reconciliation and rebuilt on read by indexing rows on their container.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Debug;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::reconcile::types::Snapshot;
use crate::store::Version;

/// Where a contained entity lives.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRef<P> {
    TopLevel,
    Within(P),
}

impl<P> ContainerRef<P> {
    pub fn parent(&self) -> Option<&P> {
        match self {
            ContainerRef::TopLevel => None,
            ContainerRef::Within(parent) => Some(parent),
        }
    }
}

/// Stored content of a contained entity. The container takes part in change
/// detection, so moving an item between containers evolves it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contained<P, C> {
    pub container: ContainerRef<P>,
    pub content: C,
}

impl<P, C> Contained<P, C> {
    pub fn top_level(content: C) -> Self {
        Self {
            container: ContainerRef::TopLevel,
            content,
        }
    }

    pub fn within(parent: P, content: C) -> Self {
        Self {
            container: ContainerRef::Within(parent),
            content,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tree<N> {
    pub node: N,
    pub children: Children<N>,
}

/// Child list of a [`Tree`]. Dropping it unlinks descendants iteratively.
#[derive(Clone, Debug, PartialEq)]
pub struct Children<N>(Vec<Tree<N>>);

impl<N> Children<N> {
    pub fn into_vec(mut self) -> Vec<Tree<N>> {
        std::mem::take(&mut self.0)
    }
}

impl<N> Deref for Children<N> {
    type Target = [Tree<N>];

    fn deref(&self) -> &[Tree<N>] {
        &self.0
    }
}

impl<N> Drop for Children<N> {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.0);
        while let Some(mut tree) = pending.pop() {
            pending.append(&mut tree.children.0);
        }
    }
}

impl<N> Tree<N> {
    pub fn leaf(node: N) -> Self {
        Self::with_children(node, Vec::new())
    }

    pub fn with_children(node: N, children: Vec<Tree<N>>) -> Self {
        Self {
            node,
            children: Children(children),
        }
    }

    /// Number of nodes in this tree.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(tree) = pending.pop() {
            count += 1;
            pending.extend(tree.children.iter());
        }
        count
    }
}

/// Flattens a forest breadth-first.
///
/// `split` receives the parent's key (`None` for roots), the node's 0-based
/// position among its siblings and the node, and returns the node's key and
/// content. Nodes without a natural identity derive their key from the
/// parent key and position. A node whose key was already taken is dropped
/// together with its subtree, and both are reported as anomalies.
pub fn flatten<N, K, C, F>(roots: Vec<Tree<N>>, mut split: F) -> Snapshot<K, Contained<K, C>>
where
    K: Ord + Clone + Debug,
    F: FnMut(Option<&K>, u32, N) -> (K, C),
{
    let mut snapshot = Snapshot::new();
    let mut queue: VecDeque<(ContainerRef<K>, u32, Tree<N>)> = roots
        .into_iter()
        .enumerate()
        .map(|(seq, tree)| (ContainerRef::TopLevel, seq as u32, tree))
        .collect();

    while let Some((container, seq, tree)) = queue.pop_front() {
        let Tree { node, children } = tree;
        let (key, content) = split(container.parent(), seq, node);
        if snapshot.get(&key).is_none() {
            for (child_seq, child) in children.into_vec().into_iter().enumerate() {
                queue.push_back((ContainerRef::Within(key.clone()), child_seq as u32, child));
            }
        } else if !children.is_empty() {
            snapshot.note(format!(
                "{} children of duplicate {key:?} dropped",
                children.len()
            ));
        }
        snapshot.push(key, Contained { container, content });
    }

    snapshot
}

/// Forest built from flat `(key, parent, item)` records.
#[derive(Debug)]
pub struct Assembled<T> {
    pub roots: Vec<Tree<T>>,
    pub anomalies: Vec<String>,
}

/// Builds trees from flat records whose parent is given by key.
///
/// Records whose parent is absent from the batch are re-rooted and reported;
/// records caught in a parent cycle are rooted at the smallest key of the
/// cycle and reported. Repeated keys keep the first record.
pub fn assemble<K, N>(flat: Vec<(K, Option<K>, N)>) -> Assembled<(K, N)>
where
    K: Ord + Clone + Debug,
{
    let mut anomalies = Vec::new();
    let mut seen = BTreeSet::new();
    let mut items = Vec::with_capacity(flat.len());
    for (key, parent, node) in flat {
        if !seen.insert(key.clone()) {
            anomalies.push(format!("duplicate key {key:?} in snapshot"));
            continue;
        }
        items.push((key.clone(), parent, (key, node)));
    }

    let mut forest = build_forest(items);
    anomalies.append(&mut forest.anomalies);
    forest.anomalies = anomalies;
    forest
}

/// Rebuilds stored contained rows into trees, children in key order.
pub fn rebuild<K, C>(
    rows: Vec<Version<K, Contained<K, C>>>,
) -> Assembled<Version<K, Contained<K, C>>>
where
    K: Ord + Clone + Debug,
{
    let items = rows
        .into_iter()
        .map(|row| {
            let parent = row.content.container.parent().cloned();
            (row.key.clone(), parent, row)
        })
        .collect();
    build_forest(items)
}

/// Turns flat parent-linked items into a contained snapshot, keeping each
/// item's own key. Orphans and cycles are re-rooted at top level and carried
/// as snapshot anomalies.
pub fn contain<K, N>(flat: Vec<(K, Option<K>, N)>) -> Snapshot<K, Contained<K, N>>
where
    K: Ord + Clone + Debug,
{
    let Assembled { roots, anomalies } = assemble(flat);
    let mut snapshot = flatten(roots, |_, _, (key, node)| (key, node));
    for anomaly in anomalies {
        snapshot.note(anomaly);
    }
    snapshot
}

/// Child indices per item, in item order.
fn child_lists(parents: &[Option<usize>]) -> Vec<Vec<usize>> {
    let mut children = vec![Vec::new(); parents.len()];
    for (idx, parent) in parents.iter().enumerate() {
        if let Some(up) = parent {
            children[*up].push(idx);
        }
    }
    children
}

fn mark_reached(children: &[Vec<usize>], reached: &mut [bool], root: usize) {
    let mut pending = vec![root];
    while let Some(idx) = pending.pop() {
        if !reached[idx] {
            reached[idx] = true;
            pending.extend(children[idx].iter().copied());
        }
    }
}

/// Follows parent links from `start` and returns the first item seen twice,
/// which lies on the cycle `start` hangs off.
fn cycle_entry(parents: &[Option<usize>], start: usize) -> usize {
    let mut visited = BTreeSet::new();
    let mut at = start;
    while visited.insert(at) {
        match parents[at] {
            Some(up) => at = up,
            None => break,
        }
    }
    at
}

fn build_forest<K, T>(items: Vec<(K, Option<K>, T)>) -> Assembled<T>
where
    K: Ord + Clone + Debug,
{
    let mut index: BTreeMap<K, usize> = BTreeMap::new();
    for (idx, (key, _, _)) in items.iter().enumerate() {
        index.entry(key.clone()).or_insert(idx);
    }

    let mut anomalies = Vec::new();
    let mut root_idx = Vec::new();
    let mut keys = Vec::with_capacity(items.len());
    let mut parents = Vec::with_capacity(items.len());
    let mut slots = Vec::with_capacity(items.len());
    for (idx, (key, parent, item)) in items.into_iter().enumerate() {
        let link = match parent {
            None => None,
            Some(parent) => match index.get(&parent) {
                Some(&up) => Some(up),
                None => {
                    anomalies.push(format!(
                        "{key:?} references missing container {parent:?}; treated as top level"
                    ));
                    None
                }
            },
        };
        if link.is_none() {
            root_idx.push(idx);
        }
        keys.push(key);
        parents.push(link);
        slots.push(Some(item));
    }

    let links = child_lists(&parents);
    let mut reached = vec![false; slots.len()];
    for &root in &root_idx {
        mark_reached(&links, &mut reached, root);
    }

    // Anything unreached sits on a parent cycle or below one. Each cycle is
    // cut at its smallest key; its descendants stay where they are.
    let mut stranded: Vec<usize> = (0..slots.len()).filter(|&idx| !reached[idx]).collect();
    stranded.sort_by(|a, b| keys[*a].cmp(&keys[*b]));
    for start in stranded {
        if reached[start] {
            continue;
        }
        let entry = cycle_entry(&parents, start);
        let mut cut = entry;
        let mut member = parents[entry];
        while let Some(idx) = member.filter(|&idx| idx != entry) {
            if keys[idx] < keys[cut] {
                cut = idx;
            }
            member = parents[idx];
        }
        anomalies.push(format!(
            "{:?} is part of a containment cycle; treated as top level",
            keys[cut]
        ));
        parents[cut] = None;
        root_idx.push(cut);
        mark_reached(&links, &mut reached, cut);
    }

    // Post-order on an explicit stack; chains may be arbitrarily deep.
    let links = child_lists(&parents);
    let mut built: Vec<Option<Tree<T>>> = (0..slots.len()).map(|_| None).collect();
    let mut roots = Vec::with_capacity(root_idx.len());
    for root in root_idx {
        let mut pending = vec![(root, false)];
        while let Some((idx, expanded)) = pending.pop() {
            if expanded {
                let kids = links[idx].iter().filter_map(|&kid| built[kid].take()).collect();
                if let Some(node) = slots[idx].take() {
                    built[idx] = Some(Tree::with_children(node, kids));
                }
            } else {
                pending.push((idx, true));
                pending.extend(links[idx].iter().rev().map(|&kid| (kid, false)));
            }
        }
        if let Some(tree) = built[root].take() {
            roots.push(tree);
        }
    }

    Assembled { roots, anomalies }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, OPEN};

    /// Kill-mail style items: no natural id, identity is the position path.
    fn path_key(parent: Option<&Vec<u32>>, seq: u32) -> Vec<u32> {
        let mut key = parent.cloned().unwrap_or_default();
        key.push(seq);
        key
    }

    #[test]
    fn flatten_is_breadth_first_with_sibling_sequence() {
        let forest = vec![
            Tree::with_children(
                "a",
                vec![
                    Tree::leaf("a0"),
                    Tree::with_children("a1", vec![Tree::leaf("a10")]),
                ],
            ),
            Tree::leaf("b"),
        ];
        let mut order = Vec::new();
        let snapshot = flatten(forest, |parent, seq, node: &str| {
            order.push(node);
            (path_key(parent, seq), node.to_string())
        });

        assert_eq!(order, vec!["a", "b", "a0", "a1", "a10"]);
        assert_eq!(snapshot.len(), 5);
        assert!(snapshot.anomalies().is_empty());

        let a10 = snapshot.get(&vec![0, 1, 0]).unwrap();
        assert_eq!(a10.container, ContainerRef::Within(vec![0, 1]));
        assert_eq!(a10.content, "a10");
        assert_eq!(snapshot.get(&vec![1]).unwrap().container, ContainerRef::TopLevel);
    }

    #[test]
    fn flatten_with_natural_keys_reports_duplicates() {
        let forest = vec![Tree::with_children(1u64, vec![Tree::leaf(2u64), Tree::leaf(2u64)])];
        let snapshot = flatten(forest, |_, _, id| (id, ()));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.anomalies().len(), 1);
    }

    #[test]
    fn flatten_drops_subtree_of_duplicate_key() {
        let forest = vec![Tree::with_children(
            1u64,
            vec![
                Tree::with_children(2u64, vec![Tree::leaf(3u64)]),
                Tree::with_children(2u64, vec![Tree::leaf(4u64)]),
            ],
        )];
        let snapshot = flatten(forest, |_, _, id| (id, ()));

        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.get(&4).is_none());
        assert_eq!(snapshot.get(&3).unwrap().container, ContainerRef::Within(2));
        assert_eq!(snapshot.anomalies().len(), 2);
        assert!(snapshot.anomalies().iter().any(|a| a.contains("children of duplicate 2")));
    }

    #[test]
    fn assemble_links_children_and_reroots_orphans() {
        let flat = vec![
            (1u64, None, "hangar"),
            (2, Some(1), "container"),
            (3, Some(2), "ammo"),
            (4, Some(99), "lost"),
        ];
        let assembled = assemble(flat);

        assert_eq!(assembled.roots.len(), 2);
        assert_eq!(assembled.roots[0].size(), 3);
        assert_eq!(assembled.roots[1].node, (4, "lost"));
        assert_eq!(assembled.anomalies.len(), 1);
    }

    #[test]
    fn assemble_breaks_cycles() {
        let flat = vec![(1u64, Some(2u64), "x"), (2, Some(1), "y"), (3, None, "z")];
        let assembled = assemble(flat);

        let total: usize = assembled.roots.iter().map(Tree::size).sum();
        assert_eq!(total, 3);
        assert_eq!(assembled.roots.len(), 2);
        assert_eq!(assembled.roots[1].node, (1, "x"));
        assert_eq!(assembled.anomalies.len(), 1);
    }

    #[test]
    fn cycle_descendants_keep_their_container() {
        let flat = vec![(5u64, Some(6u64), "a"), (6, Some(5), "b"), (0, Some(5), "c")];
        let snapshot = contain(flat);

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.get(&5).unwrap().container, ContainerRef::TopLevel);
        assert_eq!(snapshot.get(&6).unwrap().container, ContainerRef::Within(5));
        assert_eq!(snapshot.get(&0).unwrap().container, ContainerRef::Within(5));
        assert_eq!(snapshot.anomalies().len(), 1);
        assert!(snapshot.anomalies()[0].starts_with("5 is part of a containment cycle"));
    }

    #[test]
    fn deep_chain_builds_without_recursion() {
        const DEPTH: u64 = 200_000;
        let chain = || (0..DEPTH).map(|n| (n, n.checked_sub(1), n)).collect::<Vec<_>>();

        let assembled = assemble(chain());
        assert!(assembled.anomalies.is_empty());
        assert_eq!(assembled.roots.len(), 1);
        assert_eq!(assembled.roots[0].size(), DEPTH as usize);
        drop(assembled);

        let snapshot = contain(chain());
        assert_eq!(snapshot.len(), DEPTH as usize);
        assert!(snapshot.anomalies().is_empty());
        assert_eq!(
            snapshot.get(&(DEPTH - 1)).unwrap().container,
            ContainerRef::Within(DEPTH - 2)
        );
    }

    #[test]
    fn rebuild_restores_stored_tree() {
        let row = |key: u64, container: ContainerRef<u64>| Version {
            account: AccountId(1),
            key,
            content: Contained {
                container,
                content: key * 10,
            },
            life_start: 0,
            life_end: OPEN,
        };
        let rows = vec![
            row(1, ContainerRef::TopLevel),
            row(2, ContainerRef::Within(1)),
            row(3, ContainerRef::Within(1)),
            row(4, ContainerRef::Within(3)),
            row(5, ContainerRef::TopLevel),
        ];
        let forest = rebuild(rows);

        assert!(forest.anomalies.is_empty());
        assert_eq!(forest.roots.len(), 2);
        let first = &forest.roots[0];
        assert_eq!(first.node.key, 1);
        assert_eq!(
            first.children.iter().map(|c| c.node.key).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(first.children[1].children[0].node.content.content, 40);
    }

    #[test]
    fn contain_keeps_own_keys_and_reroots_orphans() {
        let flat = vec![
            ("ch-1".to_string(), None, "general"),
            ("m-1".to_string(), Some("ch-1".to_string()), "alice"),
            ("m-2".to_string(), Some("ch-9".to_string()), "bob"),
        ];
        let snapshot = contain(flat);

        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot.get(&"m-1".to_string()).unwrap().container,
            ContainerRef::Within("ch-1".to_string())
        );
        assert_eq!(
            snapshot.get(&"m-2".to_string()).unwrap().container,
            ContainerRef::TopLevel
        );
        assert_eq!(snapshot.anomalies().len(), 1);
    }
}
