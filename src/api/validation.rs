/// Asserts that the input integer is within the minimum and maximum value (inclusive).
#[macro_export]
macro_rules! validate_integer_range {
	// Match when 'self' is provided
	($self:ident, $property:ident, $min:expr, $max:expr) => {
		if $self.$property < $min || $self.$property > $max {
			return Err(
				format!(
					"Integer '{}' is out of the range {}-{}. Got {}.",
					stringify!($property), $min, $max, $self.$property
				).into()
			);
		}
	};

	// Match when there is no 'self'
	($integer:expr, $min:expr, $max:expr) => {
		if $integer < $min || $integer > $max {
			return Err(
				format!(
					"Integer '{}' is out of the range {}-{}. Got {}.",
					stringify!($integer), $min, $max, $integer
				).into()
			);
		}
	};
}

#[macro_export]
macro_rules! validate_integer_is_positive {
	// Match when 'self' is provided
	($self:ident, $property:ident) => {
		if $self.$property < 0 {
			return Err(
				format!(
					"Integer '{}' must be positive. Got {}.",
					stringify!($property), $self.$property
				).into()
			);
		}
	};

	// Match when there is no 'self'
	($property:expr) => {
		if $property < 0 {
			return Err(
				format!(
					"Integer '{}' must be positive. Got {}.",
					stringify!($property), $property
				).into()
			);
		}
	};
}

#[macro_export]
macro_rules! validate_string_length_range {
	($self:ident, $property:ident, $min_len:expr, $max_len:expr) => {
		{
			let length = $self.$property.len();

			if length < $min_len || length > $max_len {
				return Err(
					format!(
						"String '{}' length out of range. Got length {} but valid range is {}-{} inclusive.",
						stringify!($property), length, $min_len, $max_len
					).into()
				);
			}
		};
	}
}
