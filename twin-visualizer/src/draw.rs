use anyhow::{anyhow, Result};
use image::RgbImage;
use plotters::prelude::*;
use std::path::Path;
use twin_common::{Canvas, Column, SeriesDrawable};

/// Glucose panel range (mg/dL) and the height at which meals are marked.
const GLUCOSE_RANGE: (f64, f64) = (40.0, 380.0);
const MEAL_MARKER_Y: f64 = 250.0;
const TARGET_BAND: (f64, f64) = (70.0, 180.0);

const FONT: &str = "sans-serif";

fn draw_err<E: std::fmt::Debug>(e: E) -> anyhow::Error {
    anyhow!("drawing failed: {:?}", e)
}

fn series_style(column: Column) -> RGBColor {
    match column {
        Column::Actual => BLACK,
        Column::Population => BLUE,
        Column::Twin => RED,
        Column::Insulin => RGBColor(0, 128, 0),
        Column::HeartRate => RGBColor(200, 80, 0),
        Column::SleepEfficiency => RGBColor(110, 60, 170),
        Column::MealCarbs => MAGENTA,
    }
}

fn points(series: &SeriesDrawable) -> impl Iterator<Item = (f64, f64)> + '_ {
    series.x.iter().zip(&series.y).map(|(&x, &y)| (x as f64, y))
}

/// Plot x range for the canvas window, widened if it is a single point.
pub fn x_bounds(canvas: &Canvas) -> (f64, f64) {
    let (start, end) = canvas.x_range;
    let (start, end) = (start as f64, end as f64);
    if end > start {
        (start, end)
    } else {
        (start, start + 1.0)
    }
}

/// Upper y bound for a panel: the data maximum plus headroom, never below `floor`.
pub fn upper_bound(values: &[f64], floor: f64) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max.is_finite() {
        (max * 1.2).max(floor)
    } else {
        floor
    }
}

/// Draws the three chart panels for one canvas state into an RGB image.
pub fn draw_canvas(canvas: &Canvas, steps_per_hour: f64, width: u32, height: u32) -> Result<RgbImage> {
    let mut buffer = vec![0u8; (width as usize) * (height as usize) * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        if canvas.is_placeholder() {
            let grey = BLACK.mix(0.6);
            let style = TextStyle::from((FONT, 28).into_font()).color(&grey);
            root.draw_text(&canvas.annotation, &style, (width as i32 / 3, height as i32 / 2))
                .map_err(draw_err)?;
            root.present().map_err(draw_err)?;
        } else {
            let (glucose_area, rest) = root.split_vertically((height as f64 * 0.55) as u32);
            let (insulin_area, vitals_area) = rest.split_vertically((height as f64 * 0.2) as u32);
            draw_glucose_panel(&glucose_area, canvas, steps_per_hour)?;
            draw_insulin_panel(&insulin_area, canvas, steps_per_hour)?;
            draw_vitals_panel(&vitals_area, canvas, steps_per_hour)?;
            root.present().map_err(draw_err)?;
        }
    }
    RgbImage::from_raw(width, height, buffer).ok_or_else(|| anyhow!("image buffer size mismatch"))
}

pub fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .map_err(|e| anyhow!("Failed to write image '{}': {}", path.display(), e))
}

fn hours_label(steps_per_hour: f64) -> impl Fn(&f64) -> String {
    move |x| format!("{:.1}", x / steps_per_hour)
}

fn draw_glucose_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    canvas: &Canvas,
    steps_per_hour: f64,
) -> Result<()> {
    let (x0, x1) = x_bounds(canvas);
    let mut chart = ChartBuilder::on(area)
        .caption(&canvas.annotation, (FONT, 20))
        .margin(10)
        .x_label_area_size(25)
        .y_label_area_size(50)
        .build_cartesian_2d(x0..x1, GLUCOSE_RANGE.0..GLUCOSE_RANGE.1)
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .y_desc("Glucose [mg/dL]")
        .x_label_formatter(&hours_label(steps_per_hour))
        .draw()
        .map_err(draw_err)?;

    chart
        .draw_series(std::iter::once(Rectangle::new(
            [(x0, TARGET_BAND.0), (x1, TARGET_BAND.1)],
            GREEN.mix(0.1).filled(),
        )))
        .map_err(draw_err)?;

    for column in Column::GLUCOSE {
        let Some(series) = canvas.series(column) else {
            continue;
        };
        let color = series_style(column);
        chart
            .draw_series(LineSeries::new(points(series), color.stroke_width(2)))
            .map_err(draw_err)?
            .label(column.label())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .draw_series(
            canvas
                .meals
                .iter()
                .map(|meal| TriangleMarker::new((meal.index as f64, MEAL_MARKER_Y), 8, MAGENTA.filled())),
        )
        .map_err(draw_err)?;
    chart
        .draw_series(canvas.meals.iter().map(|meal| {
            Text::new(
                format!("{:.0} g", meal.carbs),
                (meal.index as f64, MEAL_MARKER_Y + 15.0),
                (FONT, 12).into_font(),
            )
        }))
        .map_err(draw_err)?;

    if let Some(reading) = &canvas.reading {
        let text = format!(
            "Glucose: {:.0} mg/dL ({}) | Insulin: {:.2} U/h",
            reading.glucose, reading.status, reading.insulin
        );
        let style = TextStyle::from((FONT, 16).into_font()).color(&BLACK);
        area.draw_text(&text, &style, (70, 40)).map_err(draw_err)?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()
        .map_err(draw_err)?;
    Ok(())
}

fn draw_insulin_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    canvas: &Canvas,
    steps_per_hour: f64,
) -> Result<()> {
    let Some(insulin) = canvas.series(Column::Insulin) else {
        return Ok(());
    };
    let (x0, x1) = x_bounds(canvas);
    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .x_label_area_size(25)
        .y_label_area_size(50)
        .build_cartesian_2d(x0..x1, 0.0..upper_bound(&insulin.y, 2.0))
        .map_err(draw_err)?;
    chart
        .configure_mesh()
        .y_desc(Column::Insulin.label())
        .x_label_formatter(&hours_label(steps_per_hour))
        .draw()
        .map_err(draw_err)?;

    let color = series_style(Column::Insulin);
    chart
        .draw_series(points(insulin).map(|(x, y)| Rectangle::new([(x - 0.4, 0.0), (x + 0.4, y)], color.filled())))
        .map_err(draw_err)?;
    Ok(())
}

fn draw_vitals_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    canvas: &Canvas,
    steps_per_hour: f64,
) -> Result<()> {
    let (Some(heart_rate), Some(sleep)) = (canvas.series(Column::HeartRate), canvas.series(Column::SleepEfficiency))
    else {
        return Ok(());
    };
    let (x0, x1) = x_bounds(canvas);
    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .right_y_label_area_size(50)
        .build_cartesian_2d(x0..x1, 40.0..upper_bound(&heart_rate.y, 120.0))
        .map_err(draw_err)?
        .set_secondary_coord(x0..x1, 0.0..1.0);

    chart
        .configure_mesh()
        .x_desc("Time [hours]")
        .y_desc(Column::HeartRate.label())
        .x_label_formatter(&hours_label(steps_per_hour))
        .draw()
        .map_err(draw_err)?;
    chart
        .configure_secondary_axes()
        .y_desc(Column::SleepEfficiency.label())
        .draw()
        .map_err(draw_err)?;

    let hr_color = series_style(Column::HeartRate);
    chart
        .draw_series(LineSeries::new(points(heart_rate), hr_color.stroke_width(2)))
        .map_err(draw_err)?;
    let sleep_color = series_style(Column::SleepEfficiency);
    chart
        .draw_secondary_series(AreaSeries::new(points(sleep), 0.0, sleep_color.mix(0.3)).border_style(sleep_color))
        .map_err(draw_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_common::CanvasRenderer;

    #[test]
    fn single_point_window_is_widened() {
        let canvas = CanvasRenderer::new(1).canvas().clone();
        assert_eq!(canvas.x_range, (0, 0));
        assert_eq!(x_bounds(&canvas), (0.0, 1.0));
    }

    #[test]
    fn upper_bound_has_headroom_and_floor() {
        assert_eq!(upper_bound(&[], 2.0), 2.0);
        assert_eq!(upper_bound(&[1.0, 0.5], 2.0), 2.0);
        assert!((upper_bound(&[10.0], 2.0) - 12.0).abs() < 1e-9);
    }
}
