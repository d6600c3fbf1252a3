//! Binary persistence format of a [`SymbolTreeInfo`].
//!
//! Layout, all integers little-endian `i32`, strings as byte length + UTF-8:
//!
//! ```text
//! format tag, checksum (16 bytes)
//! concatenated names
//! node count, (span start, span length, parent index)*
//! inheritance count, (key node, value count, value node*)*
//! receiver type count, (type name, value count, (container, method)*)*
//! complex count, (container, method)*
//! ```
//!
//! Reading validates every span and index; anything unexpected is a miss.

use std::collections::BTreeMap;

use crate::checksum::{Checksum, HASH_SIZE};
use crate::error::{Result, SymbolTreeError};

use super::info::SymbolTreeInfo;
use super::node::{ExtensionMethodInfo, Node, TextSpan, ROOT_NODE_INDEX, ROOT_NODE_PARENT_INDEX};

pub const SERIALIZATION_FORMAT: &str = "SymbolTreeInfo-v1";

/// Checksum of the persistence format itself. Mixed into storage checksums so
/// a format change invalidates everything previously written.
pub fn serialization_format_checksum() -> Checksum {
    Checksum::create(SERIALIZATION_FORMAT.as_bytes())
}

struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn write_len(&mut self, len: usize) {
        self.write_i32(len as i32);
    }

    fn write_str(&mut self, value: &str) {
        self.write_len(value.len());
        self.buffer.extend_from_slice(value.as_bytes());
    }

    fn write_extension_method(&mut self, method: &ExtensionMethodInfo) {
        self.write_str(&method.container_name);
        self.write_str(&method.method_name);
    }
}

pub fn serialize(info: &SymbolTreeInfo) -> Vec<u8> {
    let mut writer = Writer {
        buffer: Vec::with_capacity(info.concatenated_names().len() + info.node_count() * 12 + 64),
    };

    writer.write_str(SERIALIZATION_FORMAT);
    writer.buffer.extend_from_slice(info.checksum().as_bytes());
    writer.write_str(info.concatenated_names());

    writer.write_len(info.node_count());
    for node in info.nodes() {
        writer.write_i32(node.name_span.start as i32);
        writer.write_i32(node.name_span.length as i32);
        writer.write_i32(node.parent_index);
    }

    writer.write_len(info.inheritance_map().len());
    for (key, values) in info.inheritance_map() {
        writer.write_i32(*key as i32);
        writer.write_len(values.len());
        for value in values {
            writer.write_i32(*value as i32);
        }
    }

    writer.write_len(info.receiver_type_map().len());
    for (type_name, methods) in info.receiver_type_map() {
        writer.write_str(type_name);
        writer.write_len(methods.len());
        for method in methods {
            writer.write_extension_method(method);
        }
    }

    writer.write_len(info.complex_extension_methods().len());
    for method in info.complex_extension_methods() {
        writer.write_extension_method(method);
    }

    writer.buffer
}

struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

fn malformed(message: impl Into<String>) -> SymbolTreeError {
    SymbolTreeError::Serialization(message.into())
}

impl<'a> Reader<'a> {
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| malformed("unexpected end of stream"))?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_len(&mut self) -> Result<usize> {
        let value = self.read_i32()?;
        usize::try_from(value).map_err(|_| malformed(format!("negative length {}", value)))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| malformed(e.to_string()))
    }

    fn read_extension_method(&mut self) -> Result<ExtensionMethodInfo> {
        let container_name = self.read_string()?;
        let method_name = self.read_string()?;
        Ok(ExtensionMethodInfo::new(container_name, method_name))
    }

    fn read_node_index(&mut self, node_count: usize) -> Result<u32> {
        let value = self.read_len()?;
        if value >= node_count {
            return Err(malformed(format!("node index {} out of range", value)));
        }
        Ok(value as u32)
    }
}

/// Reads a persisted index, failing on any malformed or mismatching input.
pub fn try_deserialize(data: &[u8], expected_checksum: &Checksum) -> Result<SymbolTreeInfo> {
    let mut reader = Reader { data, position: 0 };

    let format = reader.read_string()?;
    if format != SERIALIZATION_FORMAT {
        return Err(malformed(format!("unknown format {}", format)));
    }

    let checksum = Checksum::from_slice(reader.read_bytes(HASH_SIZE)?)
        .ok_or_else(|| malformed("bad checksum"))?;
    if &checksum != expected_checksum {
        return Err(malformed("checksum mismatch"));
    }

    let names = reader.read_string()?;

    let node_count = reader.read_len()?;
    if node_count == 0 {
        return Err(malformed("index has no root"));
    }
    let mut nodes = Vec::with_capacity(node_count.min(data.len() / 12));
    for index in 0..node_count {
        let start = reader.read_len()?;
        let length = reader.read_len()?;
        let parent_index = reader.read_i32()?;

        if names.get(start..start + length).is_none() {
            return Err(malformed(format!("node {} has an invalid name span", index)));
        }
        let is_root = index == ROOT_NODE_INDEX;
        let valid_parent = if is_root {
            parent_index == ROOT_NODE_PARENT_INDEX
        } else {
            parent_index >= 0 && (parent_index as usize) < node_count
        };
        if !valid_parent {
            return Err(malformed(format!("node {} has an invalid parent", index)));
        }

        nodes.push(Node::new(
            TextSpan::new(start as u32, length as u32),
            parent_index,
        ));
    }

    validate_parent_chains(&nodes)?;

    let mut inheritance_map = BTreeMap::new();
    for _ in 0..reader.read_len()? {
        let key = reader.read_node_index(node_count)?;
        let count = reader.read_len()?;
        let mut values = Vec::with_capacity(count.min(node_count));
        for _ in 0..count {
            values.push(reader.read_node_index(node_count)?);
        }
        inheritance_map.insert(key, values);
    }

    let mut receiver_type_map = BTreeMap::new();
    for _ in 0..reader.read_len()? {
        let type_name = reader.read_string()?;
        let count = reader.read_len()?;
        let mut methods = Vec::new();
        for _ in 0..count {
            methods.push(reader.read_extension_method()?);
        }
        receiver_type_map.insert(type_name, methods);
    }

    let mut complex = Vec::new();
    for _ in 0..reader.read_len()? {
        complex.push(reader.read_extension_method()?);
    }

    if reader.position != data.len() {
        return Err(malformed("trailing data"));
    }

    Ok(SymbolTreeInfo::from_parts(
        checksum,
        names,
        nodes,
        inheritance_map,
        receiver_type_map,
        complex,
    ))
}

/// Every parent chain must end at the root. Parents are already in bounds and
/// only the root has a negative parent.
fn validate_parent_chains(nodes: &[Node]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Visit {
        Pending,
        OnChain,
        ReachesRoot,
    }

    let mut visits = vec![Visit::Pending; nodes.len()];
    visits[ROOT_NODE_INDEX] = Visit::ReachesRoot;
    let mut chain = Vec::new();
    for start in 0..nodes.len() {
        let mut current = start;
        while visits[current] == Visit::Pending {
            visits[current] = Visit::OnChain;
            chain.push(current);
            current = nodes[current].parent_index as usize;
        }
        if visits[current] == Visit::OnChain {
            return Err(malformed(format!("node {} has a cyclic parent chain", start)));
        }
        for index in chain.drain(..) {
            visits[index] = Visit::ReachesRoot;
        }
    }
    Ok(())
}

/// Reads a persisted index. Any failure is reported as a miss.
pub fn deserialize(data: &[u8], expected_checksum: &Checksum) -> Option<SymbolTreeInfo> {
    match try_deserialize(data, expected_checksum) {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::debug!("Discarding persisted symbol tree: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::info::NameInheritanceMap;
    use crate::tree::node::{BuilderNode, ParameterTypeInfo};

    fn sample() -> SymbolTreeInfo {
        let nodes = vec![
            BuilderNode::root(),
            BuilderNode::new("System", 0),
            BuilderNode::new("Object", 1),
            BuilderNode::new("String", 1),
            BuilderNode::new("Linq", 1),
            BuilderNode::new("Enumerable", 4),
            BuilderNode::new("Where", 5).with_parameter_type_infos(vec![ParameterTypeInfo::complex()]),
            BuilderNode::new("Any", 5)
                .with_parameter_type_infos(vec![ParameterTypeInfo::simple("String").into_array()]),
        ];
        let mut inheritance = NameInheritanceMap::new();
        inheritance
            .entry("Object".to_string())
            .or_default()
            .insert("String".to_string());
        SymbolTreeInfo::create(Checksum::create(b"mscorlib"), &nodes, &inheritance)
    }

    #[test]
    fn test_round_trip_is_equivalent() {
        let info = sample();
        let bytes = serialize(&info);
        let restored = deserialize(&bytes, &info.checksum()).unwrap();

        assert!(info.is_equivalent(&restored));
        assert_eq!(info.inheritance_map(), restored.inheritance_map());
        assert_eq!(info.receiver_type_map(), restored.receiver_type_map());
        assert_eq!(
            info.complex_extension_methods(),
            restored.complex_extension_methods()
        );
        assert_eq!(restored.derived_type_names("Object"), vec!["String"]);
    }

    #[test]
    fn test_checksum_mismatch_is_miss() {
        let info = sample();
        let bytes = serialize(&info);
        assert!(deserialize(&bytes, &Checksum::create(b"other")).is_none());
    }

    #[test]
    fn test_truncated_stream_is_miss() {
        let info = sample();
        let bytes = serialize(&info);
        for len in [0, 4, bytes.len() / 2, bytes.len() - 1] {
            assert!(deserialize(&bytes[..len], &info.checksum()).is_none());
        }
    }

    #[test]
    fn test_corrupt_parent_is_miss() {
        let info = sample();
        let mut bytes = serialize(&info);
        patch_parent(&mut bytes, &info, 1, 1000);
        assert!(deserialize(&bytes, &info.checksum()).is_none());
    }

    fn patch_parent(bytes: &mut [u8], info: &SymbolTreeInfo, node: usize, parent: i32) {
        let header = 4 + SERIALIZATION_FORMAT.len() + HASH_SIZE + 4 + info.concatenated_names().len() + 4;
        let offset = header + node * 12 + 8;
        bytes[offset..offset + 4].copy_from_slice(&parent.to_le_bytes());
    }

    #[test]
    fn test_self_parented_node_is_miss() {
        let info = sample();
        let mut bytes = serialize(&info);
        patch_parent(&mut bytes, &info, 1, 1);
        assert!(deserialize(&bytes, &info.checksum()).is_none());
    }

    #[test]
    fn test_parent_cycle_is_miss() {
        let info = sample();
        let mut bytes = serialize(&info);
        patch_parent(&mut bytes, &info, 1, 2);
        patch_parent(&mut bytes, &info, 2, 1);
        assert!(deserialize(&bytes, &info.checksum()).is_none());
    }

    #[test]
    fn test_second_root_is_miss() {
        let info = sample();
        let mut bytes = serialize(&info);
        patch_parent(&mut bytes, &info, 3, ROOT_NODE_PARENT_INDEX);
        assert!(deserialize(&bytes, &info.checksum()).is_none());
    }

    #[test]
    fn test_trailing_data_is_miss() {
        let info = sample();
        let mut bytes = serialize(&info);
        bytes.push(0);
        assert!(deserialize(&bytes, &info.checksum()).is_none());
    }

    #[test]
    fn test_empty_index_round_trip() {
        let info = SymbolTreeInfo::create_empty(Checksum::NULL);
        let restored = deserialize(&serialize(&info), &Checksum::NULL).unwrap();
        assert!(info.is_equivalent(&restored));
    }
}
