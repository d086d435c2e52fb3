use crate::{
    errors::ServiceError,
    models::{asset, asset::AssetType, serial_sequence},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, QuerySelect, Set,
};
use tracing::{debug, instrument};

/// Minimum zero-padded width of the numeric suffix.
pub const SEQUENCE_WIDTH: usize = 4;

/// Builds the serial namespace for a kind of asset.
///
/// `FIRSTWORD-INITIALS-TYPE-CATEGORY-LOCATION`, where the initials are taken from
/// the words after the first one (or from the whole name when it is a single word).
pub fn derive_prefix(
    name: &str,
    asset_type: AssetType,
    category_id: Option<i32>,
    location_id: Option<i32>,
) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    let first_word = words.first().copied().unwrap_or_default().to_uppercase();

    let initials_source = if words.len() > 1 {
        &words[1..]
    } else {
        &words[..]
    };
    let initials: String = initials_source
        .iter()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect();

    format!(
        "{}-{}-{}-{}-{}",
        first_word,
        initials,
        asset_type.code(),
        category_id.unwrap_or(0),
        location_id.unwrap_or(0)
    )
}

pub fn format_serial(prefix: &str, sequence: u64) -> String {
    format!("{}/{:0width$}", prefix, sequence, width = SEQUENCE_WIDTH)
}

/// Extracts the numeric suffix of a serial issued under `prefix`.
pub fn parse_sequence(prefix: &str, serial: &str) -> Option<u64> {
    let suffix = serial.strip_prefix(prefix)?.strip_prefix('/')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// A contiguous run of sequence numbers reserved for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialBlock {
    pub prefix: String,
    pub start: u64,
    pub count: u32,
}

impl SerialBlock {
    pub fn new(prefix: impl Into<String>, start: u64, count: u32) -> Self {
        Self {
            prefix: prefix.into(),
            start,
            count,
        }
    }

    /// Last sequence in the block; `None` when the block is empty or runs past `u64::MAX`.
    pub fn end(&self) -> Option<u64> {
        self.start
            .checked_add(u64::from(self.count))?
            .checked_sub(1)
            .filter(|end| *end >= self.start)
    }

    pub fn serials(&self) -> impl Iterator<Item = String> + '_ {
        (0..u64::from(self.count))
            .map_while(move |offset| self.start.checked_add(offset))
            .map(move |sequence| format_serial(&self.prefix, sequence))
    }
}

/// Reserves `count` consecutive serials under `prefix`.
///
/// Must run inside the caller's transaction: the counter row stays locked until
/// that transaction commits or rolls back, which serializes every allocator that
/// shares the prefix.
#[instrument(skip(conn))]
pub async fn allocate<C>(conn: &C, prefix: &str, count: u32) -> Result<SerialBlock, ServiceError>
where
    C: ConnectionTrait,
{
    if count == 0 {
        return Err(ServiceError::InvalidQuantity(
            "serial allocation requires a positive count".to_string(),
        ));
    }

    let now = Utc::now();
    let seed = serial_sequence::ActiveModel {
        prefix: Set(prefix.to_string()),
        last_sequence: Set(0),
        updated_at: Set(now),
    };
    serial_sequence::Entity::insert(seed)
        .on_conflict(
            OnConflict::column(serial_sequence::Column::Prefix)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    let counter = serial_sequence::Entity::find_by_id(prefix.to_string())
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::InternalError(format!("serial counter for {} vanished", prefix))
        })?;

    let issued = highest_issued_sequence(conn, prefix).await?;
    let last = u64::try_from(counter.last_sequence)
        .unwrap_or(0)
        .max(issued.unwrap_or(0));
    let overflow =
        || ServiceError::InternalError(format!("serial sequence overflow for {}", prefix));
    let start = last.checked_add(1).ok_or_else(overflow)?;
    let block = SerialBlock::new(prefix, start, count);
    let end = block.end().ok_or_else(overflow)?;
    let new_last = i64::try_from(end).map_err(|_| overflow())?;
    let mut active: serial_sequence::ActiveModel = counter.into();
    active.last_sequence = Set(new_last);
    active.updated_at = Set(now);
    active.update(conn).await?;

    counter!("asset_tracker.serials.allocated", u64::from(count));
    debug!(prefix, start = block.start, count, "Reserved serial block");

    Ok(block)
}

/// Greatest sequence already present on an asset, compared numerically.
async fn highest_issued_sequence<C>(conn: &C, prefix: &str) -> Result<Option<u64>, ServiceError>
where
    C: ConnectionTrait,
{
    let serials: Vec<String> = asset::Entity::find()
        .select_only()
        .column(asset::Column::SerialNumber)
        .filter(asset::Column::SerialNumber.starts_with(format!("{}/", prefix)))
        .into_tuple()
        .all(conn)
        .await?;

    Ok(serials
        .iter()
        .filter_map(|serial| parse_sequence(prefix, serial))
        .max())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Laptop", AssetType::Hardware, Some(3), Some(7), "LAPTOP-L-HW-3-7")]
    #[case("Dell Latitude 5420", AssetType::Hardware, None, Some(2), "DELL-L5-HW-0-2")]
    #[case("office suite license", AssetType::Software, Some(1), None, "OFFICE-SL-SW-1-0")]
    #[case("  Standing   desk ", AssetType::Hardware, None, None, "STANDING-D-HW-0-0")]
    fn prefix_follows_name_type_and_placement(
        #[case] name: &str,
        #[case] asset_type: AssetType,
        #[case] category_id: Option<i32>,
        #[case] location_id: Option<i32>,
        #[case] expected: &str,
    ) {
        assert_eq!(
            derive_prefix(name, asset_type, category_id, location_id),
            expected
        );
    }

    #[test]
    fn serials_are_padded_to_four_digits_and_grow_past_them() {
        assert_eq!(format_serial("P", 1), "P/0001");
        assert_eq!(format_serial("P", 9999), "P/9999");
        assert_eq!(format_serial("P", 10000), "P/10000");
    }

    #[rstest]
    #[case("LAPTOP-L-HW-0-0/0042", Some(42))]
    #[case("LAPTOP-L-HW-0-0/10000", Some(10000))]
    #[case("LAPTOP-L-HW-0-0/abc", None)]
    #[case("LAPTOP-L-HW-0-0/", None)]
    #[case("LAPTOP-L-HW-0-00/0001", None)]
    #[case("OTHER-O-HW-0-0/0001", None)]
    fn parse_sequence_only_accepts_numeric_suffix_of_same_prefix(
        #[case] serial: &str,
        #[case] expected: Option<u64>,
    ) {
        assert_eq!(parse_sequence("LAPTOP-L-HW-0-0", serial), expected);
    }

    #[test]
    fn block_renders_contiguous_serials() {
        let block = SerialBlock::new("P", 4, 2);
        assert_eq!(block.end(), Some(5));
        assert_eq!(
            block.serials().collect::<Vec<_>>(),
            vec!["P/0004".to_string(), "P/0005".to_string()]
        );
    }

    #[test]
    fn empty_or_overflowing_blocks_have_no_end() {
        let empty = SerialBlock::new("P", 0, 0);
        assert_eq!(empty.end(), None);
        assert_eq!(empty.serials().count(), 0);

        let past_max = SerialBlock::new("P", u64::MAX, 2);
        assert_eq!(past_max.end(), None);
        assert_eq!(past_max.serials().count(), 1);

        assert_eq!(SerialBlock::new("P", u64::MAX, 1).end(), Some(u64::MAX));
    }
}
