use std::marker::PhantomData;

use alloy_primitives::{aliases::U96, Address, U256};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::model::Subnetwork;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage IO error: {0}")]
    Io(String),

    #[error("corrupt storage row: {0}")]
    Corrupt(String),
}

impl Error {
    /// Transient failures are worth retrying at the driver level, anything
    /// else signals data corruption and must abort.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(value: rocksdb::Error) -> Self {
        Error::Io(value.to_string())
    }
}

/// A fixed-width portion of a table key. Encodings are big-endian so that the
/// lexicographic order of raw keys matches the numeric order of their parts.
pub trait KeySegment: Sized {
    const WIDTH: usize;

    fn write(&self, out: &mut Vec<u8>);
    fn read(bytes: &[u8]) -> Self;
}

pub struct DBInt(pub u64);

impl KeySegment for DBInt {
    const WIDTH: usize = 8;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_be_bytes());
    }

    fn read(bytes: &[u8]) -> Self {
        let inner: [u8; 8] = bytes[0..8].try_into().unwrap();
        DBInt(u64::from_be_bytes(inner))
    }
}

impl From<u64> for DBInt {
    fn from(value: u64) -> Self {
        DBInt(value)
    }
}

pub struct DBAddr(pub Address);

impl KeySegment for DBAddr {
    const WIDTH: usize = 20;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.0.as_slice());
    }

    fn read(bytes: &[u8]) -> Self {
        DBAddr(Address::from_slice(&bytes[0..20]))
    }
}

impl From<Address> for DBAddr {
    fn from(value: Address) -> Self {
        DBAddr(value)
    }
}

/// The on-chain `bytes32` layout: 20-byte network address followed by the
/// 12-byte big-endian subnetwork identifier.
pub struct DBSubnet(pub Subnetwork);

impl KeySegment for DBSubnet {
    const WIDTH: usize = 32;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.0.network.as_slice());
        out.extend_from_slice(&self.0.identifier.to_be_bytes::<12>());
    }

    fn read(bytes: &[u8]) -> Self {
        let network = Address::from_slice(&bytes[0..20]);
        let identifier: [u8; 12] = bytes[20..32].try_into().unwrap();
        DBSubnet(Subnetwork {
            network,
            identifier: U96::from_be_bytes(identifier),
        })
    }
}

impl From<Subnetwork> for DBSubnet {
    fn from(value: Subnetwork) -> Self {
        DBSubnet(value)
    }
}

macro_rules! single_segment_conversions {
    ($name:ident) => {
        impl From<$name> for Box<[u8]> {
            fn from(value: $name) -> Self {
                let mut out = Vec::with_capacity(<$name>::WIDTH);
                value.write(&mut out);
                out.into()
            }
        }

        impl From<Box<[u8]>> for $name {
            fn from(value: Box<[u8]>) -> Self {
                <$name>::read(&value)
            }
        }
    };
}

single_segment_conversions!(DBInt);
single_segment_conversions!(DBAddr);
single_segment_conversions!(DBSubnet);

pub struct DBBytes(pub Vec<u8>);

impl From<DBBytes> for Box<[u8]> {
    fn from(value: DBBytes) -> Self {
        value.0.into()
    }
}

impl From<Box<[u8]>> for DBBytes {
    fn from(value: Box<[u8]>) -> Self {
        Self(value.into())
    }
}

pub struct DBU256(pub U256);

impl From<DBU256> for Box<[u8]> {
    fn from(value: DBU256) -> Self {
        Box::new(value.0.to_be_bytes::<32>())
    }
}

impl From<Box<[u8]>> for DBU256 {
    fn from(value: Box<[u8]>) -> Self {
        let inner: [u8; 32] = value[0..32].try_into().unwrap();
        DBU256(U256::from_be_bytes(inner))
    }
}

impl From<U256> for DBU256 {
    fn from(value: U256) -> Self {
        DBU256(value)
    }
}

pub struct DBBool(pub bool);

impl From<DBBool> for Box<[u8]> {
    fn from(value: DBBool) -> Self {
        Box::new([value.0 as u8])
    }
}

impl From<Box<[u8]>> for DBBool {
    fn from(value: Box<[u8]>) -> Self {
        DBBool(value[0] != 0)
    }
}

#[derive(Debug)]
pub struct DBSerde<V>(pub V);

impl<V> std::ops::Deref for DBSerde<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<V> From<DBSerde<V>> for Box<[u8]>
where
    V: Serialize,
{
    fn from(v: DBSerde<V>) -> Self {
        bincode::serialize(&v.0)
            .map(|x| x.into_boxed_slice())
            .unwrap()
    }
}

impl<V> From<Box<[u8]>> for DBSerde<V>
where
    V: DeserializeOwned,
{
    fn from(value: Box<[u8]>) -> Self {
        let inner = bincode::deserialize(&value).unwrap();
        DBSerde(inner)
    }
}

impl<V> Clone for DBSerde<V>
where
    V: Clone,
{
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

macro_rules! segment_key {
    ($name:ident, $($idx:tt => $part:ident),+) => {
        pub struct $name<$($part),+>($(pub $part),+);

        impl<$($part: KeySegment),+> From<$name<$($part),+>> for Box<[u8]> {
            fn from(value: $name<$($part),+>) -> Self {
                let mut out = Vec::with_capacity($(<$part>::WIDTH +)+ 0);
                $(value.$idx.write(&mut out);)+
                out.into()
            }
        }

        impl<$($part: KeySegment),+> From<Box<[u8]>> for $name<$($part),+> {
            #[allow(unused_assignments)]
            fn from(value: Box<[u8]>) -> Self {
                let mut at = 0usize;
                $name($({
                    let part = <$part>::read(&value[at..]);
                    at += <$part>::WIDTH;
                    part
                }),+)
            }
        }
    };
}

segment_key!(DBKey2, 0 => A, 1 => B);
segment_key!(DBKey3, 0 => A, 1 => B, 2 => C);
segment_key!(DBKey4, 0 => A, 1 => B, 2 => C, 3 => D);

type RocksIterator<'a> = rocksdb::DBIteratorWithThreadMode<'a, rocksdb::DB>;

pub struct EntryIterator<'a, K, V>(RocksIterator<'a>, PhantomData<(K, V)>);

impl<'a, K, V> EntryIterator<'a, K, V> {
    pub fn new(inner: RocksIterator<'a>) -> Self {
        Self(inner, Default::default())
    }
}

impl<K, V> Iterator for EntryIterator<'_, K, V>
where
    K: From<Box<[u8]>>,
    V: From<Box<[u8]>>,
{
    type Item = Result<(K, V), Error>;

    fn next(&mut self) -> Option<Result<(K, V), Error>> {
        match self.0.next() {
            Some(Ok((key, value))) => Some(Ok((K::from(key), V::from(value)))),
            Some(Err(err)) => {
                tracing::error!(?err, "rocksdb iterator failure");
                Some(Err(Error::Io(err.to_string())))
            }
            None => None,
        }
    }
}

/// Entry iterator bounded to keys sharing a raw prefix. The prefix is checked
/// on the raw key before any decoding happens.
pub struct PrefixIterator<'a, K, V> {
    inner: RocksIterator<'a>,
    prefix: Box<[u8]>,
    marker: PhantomData<(K, V)>,
}

impl<'a, K, V> PrefixIterator<'a, K, V> {
    pub fn new(inner: RocksIterator<'a>, prefix: Box<[u8]>) -> Self {
        Self {
            inner,
            prefix,
            marker: Default::default(),
        }
    }
}

impl<K, V> Iterator for PrefixIterator<'_, K, V>
where
    K: From<Box<[u8]>>,
    V: From<Box<[u8]>>,
{
    type Item = Result<(K, V), Error>;

    fn next(&mut self) -> Option<Result<(K, V), Error>> {
        match self.inner.next() {
            Some(Ok((key, value))) => {
                if !key.starts_with(&self.prefix) {
                    return None;
                }

                Some(Ok((K::from(key), V::from(value))))
            }
            Some(Err(err)) => {
                tracing::error!(?err, "rocksdb iterator failure");
                Some(Err(Error::Io(err.to_string())))
            }
            None => None,
        }
    }
}

pub trait KVTable<K, V>
where
    Box<[u8]>: From<K>,
    Box<[u8]>: From<V>,
    K: From<Box<[u8]>>,
    V: From<Box<[u8]>>,
{
    const CF_NAME: &'static str;

    fn cf(db: &rocksdb::DB) -> rocksdb::ColumnFamilyRef {
        db.cf_handle(Self::CF_NAME).unwrap()
    }

    fn get_by_key(db: &rocksdb::DB, k: K) -> Result<Option<V>, Error> {
        let cf = Self::cf(db);
        let raw_key = Box::<[u8]>::from(k);
        let raw_value = db.get_cf(&cf, raw_key)?.map(|x| Box::from(x.as_slice()));

        Ok(raw_value.map(V::from))
    }

    fn stage_upsert(db: &rocksdb::DB, k: K, v: V, batch: &mut rocksdb::WriteBatch) {
        let cf = Self::cf(db);

        let k_raw = Box::<[u8]>::from(k);
        let v_raw = Box::<[u8]>::from(v);

        batch.put_cf(&cf, k_raw, v_raw);
    }

    fn iter_entries<'a>(
        db: &'a rocksdb::DB,
        mode: rocksdb::IteratorMode,
    ) -> EntryIterator<'a, K, V> {
        let cf = Self::cf(db);
        let inner = db.iterator_cf(&cf, mode);
        EntryIterator::new(inner)
    }

    fn iter_entries_start(db: &rocksdb::DB) -> EntryIterator<'_, K, V> {
        Self::iter_entries(db, rocksdb::IteratorMode::Start)
    }

    fn iter_prefix<'a>(db: &'a rocksdb::DB, prefix: Box<[u8]>) -> PrefixIterator<'a, K, V> {
        let cf = Self::cf(db);
        let mode = rocksdb::IteratorMode::From(&prefix, rocksdb::Direction::Forward);
        let inner = db.iterator_cf(&cf, mode);

        PrefixIterator::new(inner, prefix)
    }

    fn last_entry(db: &rocksdb::DB) -> Result<Option<(K, V)>, Error> {
        let mut iter = Self::iter_entries(db, rocksdb::IteratorMode::End);

        match iter.next() {
            None => Ok(None),
            Some(x) => Ok(Some(x?)),
        }
    }

    /// Last entry whose key is at or before the given one.
    fn last_entry_at_or_before(db: &rocksdb::DB, k: K) -> Result<Option<(K, V)>, Error> {
        let raw = Box::<[u8]>::from(k);
        let mode = rocksdb::IteratorMode::From(&raw, rocksdb::Direction::Reverse);
        let mut iter = Self::iter_entries(db, mode);

        match iter.next() {
            None => Ok(None),
            Some(x) => Ok(Some(x?)),
        }
    }
}
